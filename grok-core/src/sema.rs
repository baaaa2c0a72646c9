#![forbid(unsafe_code)]

//! Whole-program driver.
//!
//! Declarations are registered first. Functions and impl methods are then
//! grouped into strongly connected components of the reference graph and
//! inferred wave by wave, each wave's components in parallel. Results are
//! merged into the symbol table in source order. Once every wave has joined,
//! trait obligations are discharged against the complete table and the
//! ownership verifier runs over each surviving item.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use grok_ast::{Expr, ExprKind, FnDef, Item, Pattern, Program, Span, Stmt};
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::collect::{self, GroupFailure, GroupMember, InferredItem, Obligation};
use crate::config::CheckerConfig;
use crate::error::{ErrorKind, InternalError, SemanticError};
use crate::symbols::{Signature, SymbolTable, export_scheme};
use crate::traits::{Resolution, TraitResolver};
use crate::typed::TypedProgram;
use crate::types::TyVarId;
use crate::verifier::{self, Verified};

/// Result of checking a whole program.
#[derive(Debug)]
pub struct CheckOutcome {
    /// Items that passed every check, in source order.
    pub program: TypedProgram,
    /// Sorted by item source order, then span.
    pub diagnostics: Vec<SemanticError>,
}

impl CheckOutcome {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

pub struct Checker {
    config: CheckerConfig,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

/// A function or impl method to be inferred.
struct Unit<'p> {
    name: String,
    def: &'p FnDef,
    /// `None` when the written signature failed to resolve.
    sig: Option<Signature>,
    /// Index of the top-level item that declares it.
    order: usize,
}

impl Checker {
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    #[instrument(skip_all, fields(items = program.items.len()))]
    pub fn check_program(&self, program: &Program) -> Result<CheckOutcome, InternalError> {
        let (mut symbols, declared) = SymbolTable::declare(program);
        let mut diagnostics: Vec<(usize, SemanticError)> = declared
            .into_iter()
            .map(|e| (item_at(program, e.span), e))
            .collect();

        let units = self.units(program, &mut symbols, &mut diagnostics);
        let mut failed: BTreeSet<usize> = units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.sig.is_none())
            .map(|(i, _)| i)
            .collect();

        let deps = dependencies(&units);
        let waves = schedule(&deps);
        let mut inferred: BTreeMap<usize, InferredItem> = BTreeMap::new();

        for (level, wave) in waves.iter().enumerate() {
            let mut jobs: Vec<&Vec<usize>> = Vec::new();
            for comp in wave {
                let blocked = comp
                    .iter()
                    .any(|&i| failed.contains(&i) || deps[i].iter().any(|d| failed.contains(d)));
                if blocked {
                    for &i in comp {
                        if failed.insert(i) {
                            debug!(item = %units[i].name, "withheld: depends on a failed item");
                        }
                    }
                    continue;
                }
                jobs.push(comp);
            }
            debug!(wave = level, groups = jobs.len(), "analysing wave");

            let results = self.run_wave(&symbols, &units, &jobs);

            let mut internal: Option<InternalError> = None;
            for (comp, result) in jobs.iter().zip(results) {
                match result {
                    Ok(items) => {
                        for (&i, item) in comp.iter().zip(items) {
                            symbols.publish(&item.name, item.scheme.clone());
                            inferred.insert(i, item);
                        }
                    }
                    Err(GroupFailure::Semantic { item, error }) => {
                        let order = comp
                            .iter()
                            .find(|&&i| units[i].name == item)
                            .map_or(units[comp[0]].order, |&i| units[i].order);
                        debug!(item = %item, kind = ?error.kind, "group failed");
                        diagnostics.push((order, error.in_item(item)));
                        failed.extend(comp.iter().copied());
                    }
                    Err(GroupFailure::Internal(e)) => {
                        internal.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = internal {
                return Err(e);
            }
        }

        for (&i, item) in &mut inferred {
            let order = units[i].order;
            let mut errors = std::mem::take(&mut item.errors);
            errors.extend(discharge(&symbols, item));
            if !errors.is_empty() {
                failed.insert(i);
            }
            diagnostics.extend(errors.into_iter().map(|e| (order, e.in_item(item.name.clone()))));
        }

        let candidates: Vec<(usize, &InferredItem)> = inferred
            .iter()
            .filter(|(i, _)| !failed.contains(i))
            .map(|(i, item)| (*i, item))
            .collect();
        let verify = |(i, item): &(usize, &InferredItem)| {
            (*i, verifier::verify_function(&item.function, &symbols))
        };
        let verified: Vec<(usize, Result<Verified, InternalError>)> = if self.config.parallel {
            candidates.par_iter().map(verify).collect()
        } else {
            candidates.iter().map(verify).collect()
        };

        let mut annotations = HashMap::new();
        for (i, result) in verified {
            let v = result?;
            if v.errors.is_empty() {
                annotations.insert(i, v.annotations);
                continue;
            }
            failed.insert(i);
            let name = &units[i].name;
            diagnostics.extend(
                v.errors
                    .into_iter()
                    .map(|e| (units[i].order, e.in_item(name.clone()))),
            );
        }

        let mut functions = Vec::new();
        for (i, mut item) in inferred {
            if failed.contains(&i) {
                continue;
            }
            item.function.ownership = annotations.remove(&i).unwrap_or_default();
            functions.push(item.function);
        }

        diagnostics.sort_by_key(|(order, e)| (*order, e.span));
        let diagnostics: Vec<SemanticError> = diagnostics.into_iter().map(|(_, e)| e).collect();
        debug!(
            accepted = functions.len(),
            errors = diagnostics.len(),
            "check finished"
        );
        Ok(CheckOutcome {
            program: TypedProgram { functions },
            diagnostics,
        })
    }

    /// Lists functions and impl methods in source order and publishes the
    /// schemes of fully annotated functions.
    fn units<'p>(
        &self,
        program: &'p Program,
        symbols: &mut SymbolTable,
        diagnostics: &mut Vec<(usize, SemanticError)>,
    ) -> Vec<Unit<'p>> {
        let mut units = Vec::new();
        let mut seen: HashMap<&str, Span> = HashMap::new();
        let mut next = 0u32;

        for (order, item) in program.items.iter().enumerate() {
            match item {
                Item::Function(f) => {
                    let name = f.name.node.as_str();
                    if let Some(first) = seen.get(name) {
                        diagnostics.push((
                            order,
                            SemanticError::new(
                                ErrorKind::DuplicateDefinition,
                                f.name.span,
                                format!("the name `{name}` is defined multiple times"),
                            )
                            .involving(name)
                            .with_related(*first, format!("previous definition of `{name}` here"))
                            .in_item(name),
                        ));
                        continue;
                    }
                    seen.insert(name, f.name.span);
                    let sig = match symbols.signature(f, &[], None) {
                        Ok(sig) => Some(sig),
                        Err(e) => {
                            diagnostics.push((order, e.in_item(name)));
                            None
                        }
                    };
                    if let Some(fn_ty) = sig.as_ref().and_then(Signature::fn_type) {
                        let params = sig.as_ref().map_or(&[][..], |s| &s.type_params[..]);
                        let scheme = export_scheme(&fn_ty, params, &mut || {
                            next += 1;
                            TyVarId(next - 1)
                        });
                        symbols.publish(name, scheme);
                    }
                    units.push(Unit {
                        name: name.to_string(),
                        def: f,
                        sig,
                        order,
                    });
                }
                Item::Impl(imp) => {
                    // Impls that failed validation were reported by the declaration pass.
                    let Some(info) = symbols.impls.iter().find(|i| i.span == imp.span) else {
                        continue;
                    };
                    let head = info
                        .self_ty
                        .head_name()
                        .map_or_else(|| info.self_ty.to_string(), str::to_string);
                    let mut methods = Vec::new();
                    for m in &imp.methods {
                        let name = match &info.trait_name {
                            Some(t) => format!("<{} as {t}>::{}", info.self_ty, m.name.node),
                            None => format!("{head}::{}", m.name.node),
                        };
                        let sig = symbols.signature(m, &info.params, Some(info.self_ty.clone()));
                        methods.push((name, m, sig));
                    }
                    for (name, m, sig) in methods {
                        let sig = match sig {
                            Ok(sig) => Some(sig),
                            Err(e) => {
                                diagnostics.push((order, e.in_item(name.clone())));
                                None
                            }
                        };
                        units.push(Unit {
                            name,
                            def: m,
                            sig,
                            order,
                        });
                    }
                }
                Item::Struct(_) | Item::Enum(_) | Item::Trait(_) => {}
            }
        }
        units
    }

    fn run_wave(
        &self,
        symbols: &SymbolTable,
        units: &[Unit<'_>],
        jobs: &[&Vec<usize>],
    ) -> Vec<Result<Vec<InferredItem>, GroupFailure>> {
        let run = |comp: &&Vec<usize>| {
            let members: Vec<GroupMember<'_>> = comp
                .iter()
                .filter_map(|&i| {
                    let u = &units[i];
                    Some(GroupMember {
                        name: u.name.clone(),
                        def: u.def,
                        sig: u.sig.clone()?,
                    })
                })
                .collect();
            collect::infer_group(symbols, &self.config, &members)
        };
        if self.config.parallel {
            jobs.par_iter().map(run).collect()
        } else {
            jobs.iter().map(run).collect()
        }
    }
}

/// Index of the top-level item containing `span`.
fn item_at(program: &Program, span: Span) -> usize {
    program
        .items
        .iter()
        .rposition(|item| item.span() <= span)
        .unwrap_or(0)
}

/// Discharges the item's remaining trait obligations against the complete
/// symbol table.
fn discharge(symbols: &SymbolTable, item: &InferredItem) -> Vec<SemanticError> {
    let resolver = TraitResolver::new(symbols, item.function.assumptions.clone());
    let mut errors = Vec::new();
    for Obligation {
        ty, trait_name, span, ..
    } in &item.obligations
    {
        match resolver.resolve_bound(ty, trait_name, *span) {
            Ok(Resolution::Satisfied) => {}
            Ok(Resolution::Deferred(_)) if trait_name == "Integer" => errors.push(
                SemanticError::new(
                    ErrorKind::AnnotationRequired,
                    *span,
                    "type annotations needed: cannot infer the width of this integer literal",
                )
                .involving(ty.to_string()),
            ),
            Ok(Resolution::Deferred(_)) => errors.push(
                SemanticError::new(
                    ErrorKind::AnnotationRequired,
                    *span,
                    format!("type annotations needed: cannot satisfy `{ty}: {trait_name}`"),
                )
                .involving(ty.to_string())
                .involving(trait_name.clone()),
            ),
            Err(e) => errors.push(e),
        }
    }
    errors
}

/// For each unit, the units it must wait for: unannotated functions it
/// names. Annotated functions are published before inference starts, unless
/// their signature failed to resolve.
fn dependencies(units: &[Unit<'_>]) -> Vec<BTreeSet<usize>> {
    let inferred: HashMap<&str, usize> = units
        .iter()
        .enumerate()
        .filter(|(_, u)| !u.def.is_fully_annotated() || u.sig.is_none())
        .map(|(i, u)| (u.name.as_str(), i))
        .collect();
    units
        .iter()
        .map(|u| {
            let mut refs = References::default();
            refs.bound
                .extend(u.def.params.iter().map(|p| p.name.node.clone()));
            refs.expr(&u.def.body);
            refs.found
                .iter()
                .filter_map(|name| inferred.get(name.as_str()).copied())
                .collect()
        })
        .collect()
}

/// Free names of a body, respecting local shadowing.
#[derive(Default)]
struct References {
    bound: Vec<String>,
    found: BTreeSet<String>,
}

impl References {
    fn expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Literal(_) | ExprKind::Return(None) => {}
            ExprKind::Ident(id) => {
                if !self.bound.iter().any(|b| *b == id.node) {
                    self.found.insert(id.node.clone());
                }
            }
            ExprKind::Unary { expr, .. }
            | ExprKind::Borrow { expr, .. }
            | ExprKind::Deref(expr)
            | ExprKind::Return(Some(expr)) => self.expr(expr),
            ExprKind::Field { base, .. } => self.expr(base),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Assign { target, value } => {
                self.expr(target);
                self.expr(value);
            }
            ExprKind::Call { callee, args } => {
                self.expr(callee);
                args.iter().for_each(|a| self.expr(a));
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.expr(receiver);
                args.iter().for_each(|a| self.expr(a));
            }
            ExprKind::Variant { args, .. } | ExprKind::Tuple(args) => {
                args.iter().for_each(|a| self.expr(a));
            }
            ExprKind::StructLit { fields, .. } => fields.iter().for_each(|(_, f)| self.expr(f)),
            ExprKind::Lambda { params, body } => {
                let mark = self.bound.len();
                self.bound.extend(params.iter().map(|p| p.name.node.clone()));
                self.expr(body);
                self.bound.truncate(mark);
            }
            ExprKind::Block(block) => {
                let mark = self.bound.len();
                for stmt in &block.stmts {
                    match stmt {
                        Stmt::Let(l) if matches!(l.init.kind, ExprKind::Lambda { .. }) => {
                            self.bound.push(l.name.node.clone());
                            self.expr(&l.init);
                        }
                        Stmt::Let(l) => {
                            self.expr(&l.init);
                            self.bound.push(l.name.node.clone());
                        }
                        Stmt::Expr(e) => self.expr(e),
                    }
                }
                if let Some(tail) = &block.tail {
                    self.expr(tail);
                }
                self.bound.truncate(mark);
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond);
                self.expr(then_branch);
                if let Some(e) = else_branch {
                    self.expr(e);
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                self.expr(scrutinee);
                for arm in arms {
                    let mark = self.bound.len();
                    self.pattern(&arm.pat);
                    self.expr(&arm.body);
                    self.bound.truncate(mark);
                }
            }
        }
    }

    fn pattern(&mut self, p: &Pattern) {
        match p {
            Pattern::Binding(id) => self.bound.push(id.node.clone()),
            Pattern::Wildcard { .. } | Pattern::Literal { .. } => {}
            Pattern::Tuple { elems, .. } | Pattern::Variant { fields: elems, .. } => {
                elems.iter().for_each(|e| self.pattern(e));
            }
            Pattern::Struct { fields, .. } => fields.iter().for_each(|(_, f)| self.pattern(f)),
        }
    }
}

/// Groups units into strongly connected components (Tarjan) and layers the
/// condensation into waves: every component comes after the components it
/// depends on. Components and their members are in source order.
fn schedule(deps: &[BTreeSet<usize>]) -> Vec<Vec<Vec<usize>>> {
    let comps = Tarjan::run(deps);
    let mut comp_of = vec![0; deps.len()];
    for (c, members) in comps.iter().enumerate() {
        for &m in members {
            comp_of[m] = c;
        }
    }

    // Tarjan emits a component only after everything it reaches.
    let mut level = vec![0usize; comps.len()];
    for (c, members) in comps.iter().enumerate() {
        let l = members
            .iter()
            .flat_map(|&m| deps[m].iter())
            .map(|&d| comp_of[d])
            .filter(|&d| d != c)
            .map(|d| level[d] + 1)
            .max()
            .unwrap_or(0);
        level[c] = l;
    }

    let depth = level.iter().copied().max().map_or(0, |l| l + 1);
    let mut waves: Vec<Vec<Vec<usize>>> = vec![Vec::new(); depth];
    for (c, mut members) in comps.into_iter().enumerate() {
        members.sort_unstable();
        waves[level[c]].push(members);
    }
    for wave in &mut waves {
        wave.sort_by_key(|comp| comp[0]);
    }
    waves
}

struct Tarjan<'g> {
    graph: &'g [BTreeSet<usize>],
    index: Vec<Option<usize>>,
    low: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: usize,
    comps: Vec<Vec<usize>>,
}

impl<'g> Tarjan<'g> {
    fn run(graph: &'g [BTreeSet<usize>]) -> Vec<Vec<usize>> {
        let n = graph.len();
        let mut t = Tarjan {
            graph,
            index: vec![None; n],
            low: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next: 0,
            comps: Vec::new(),
        };
        for v in 0..n {
            if t.index[v].is_none() {
                t.connect(v);
            }
        }
        t.comps
    }

    fn connect(&mut self, v: usize) {
        self.index[v] = Some(self.next);
        self.low[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        let graph = self.graph;
        for &w in &graph[v] {
            match self.index[w] {
                None => {
                    self.connect(w);
                    self.low[v] = self.low[v].min(self.low[w]);
                }
                Some(iw) if self.on_stack[w] => self.low[v] = self.low[v].min(iw),
                Some(_) => {}
            }
        }

        if Some(self.low[v]) == self.index[v] {
            let mut comp = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                comp.push(w);
                if w == v {
                    break;
                }
            }
            self.comps.push(comp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(usize, usize)], n: usize) -> Vec<BTreeSet<usize>> {
        let mut g = vec![BTreeSet::new(); n];
        for &(a, b) in edges {
            g[a].insert(b);
        }
        g
    }

    #[test]
    fn mutual_recursion_forms_one_component() {
        let comps = Tarjan::run(&graph(&[(0, 1), (1, 0), (2, 0)], 3));
        assert_eq!(comps.len(), 2);
        let mut first = comps[0].clone();
        first.sort_unstable();
        assert_eq!(first, vec![0, 1]);
        assert_eq!(comps[1], vec![2]);
    }

    #[test]
    fn waves_respect_dependencies() {
        // 0 -> 1 -> 2, 3 independent.
        let waves = schedule(&graph(&[(0, 1), (1, 2)], 4));
        assert_eq!(waves, vec![vec![vec![2], vec![3]], vec![vec![1]], vec![vec![0]]]);
    }

    #[test]
    fn locals_shadow_global_names() {
        use grok_ast::{Block, LetStmt, ident, span};
        let s = span(1, 1);
        let body = Expr::new(
            s,
            ExprKind::Block(Block {
                span: s,
                stmts: vec![Stmt::Let(LetStmt {
                    span: s,
                    name: ident(s, "helper"),
                    mutable: false,
                    ty: None,
                    init: Expr::new(s, ExprKind::Ident(ident(s, "other"))),
                })],
                tail: Some(Box::new(Expr::new(s, ExprKind::Ident(ident(s, "helper"))))),
            }),
        );
        let mut refs = References::default();
        refs.expr(&body);
        assert_eq!(refs.found.into_iter().collect::<Vec<_>>(), vec!["other".to_string()]);
    }
}

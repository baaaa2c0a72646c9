#![forbid(unsafe_code)]

//! Constraint collection over one group of mutually recursive items.
//!
//! The collector walks the AST, allocates fresh variables, emits equality,
//! bound and method constraints, and builds the typed tree as it goes. The
//! constraint log is solved incrementally: at every let boundary (so that
//! generalization sees the current substitution) and wherever the head of a
//! type is needed (call targets, field access, dereference).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use grok_ast::{BinOp, Block, Expr, ExprKind, FnDef, LetStmt, Literal, Pattern, Span, Stmt, UnaryOp};

use crate::config::{CheckerConfig, IntLiteralMode};
use crate::constraint::{Constraint, ConstraintSet, MethodConstraint};
use crate::env::TypeEnv;
use crate::error::{ErrorKind, InternalError, SemanticError};
use crate::exhaustive;
use crate::generalize::{generalize, instantiate};
use crate::move_tracking::is_place;
use crate::subst::Substitution;
use crate::symbols::{Assumption, Signature, SymbolTable, TypeScope};
use crate::traits::{MethodLookup, MethodTarget, Resolution, TraitResolver};
use crate::typed::{
    Dispatch, PatternKind, ReceiverMode, TypedArm, TypedBlock, TypedExpr, TypedExprKind,
    TypedFunction, TypedLet, TypedParam, TypedPattern, TypedStmt,
};
use crate::types::{Mutability, Scheme, TyVar, TyVarId, Type};
use crate::unify::unify;

/// A trait bound that still has to be discharged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Obligation {
    pub ty: Type,
    pub trait_name: String,
    pub span: Span,
    /// Index of the group member that raised it.
    pub item: usize,
}

/// One function or method analysed as part of a group.
pub struct GroupMember<'p> {
    pub name: String,
    pub def: &'p FnDef,
    pub sig: Signature,
}

#[derive(Debug)]
pub struct InferredItem {
    pub name: String,
    pub scheme: Scheme,
    pub function: TypedFunction,
    pub obligations: Vec<Obligation>,
    /// Diagnostics that do not affect the item's scheme.
    pub errors: Vec<SemanticError>,
}

#[derive(Debug)]
pub enum GroupFailure {
    Semantic { item: String, error: SemanticError },
    Internal(InternalError),
}

struct Draft {
    fn_ty: Type,
    params: Vec<TypedParam>,
    ret: Type,
    body: TypedExpr,
}

pub struct InferCtx<'a> {
    symbols: &'a SymbolTable,
    config: &'a CheckerConfig,
    next_var: u32,
    subst: Substitution,
    constraints: ConstraintSet,
    pending_methods: Vec<MethodConstraint>,
    obligations: Vec<Obligation>,
    dispatch: Vec<Option<(Dispatch, ReceiverMode)>>,
    returns: Vec<Type>,
    /// Monomorphic types of the group's own members.
    group: BTreeMap<String, Type>,
    scope: TypeScope,
    assumptions: Vec<Assumption>,
    current: usize,
}

/// Infers a strongly connected group of items together.
pub fn infer_group(
    symbols: &SymbolTable,
    config: &CheckerConfig,
    members: &[GroupMember<'_>],
) -> Result<Vec<InferredItem>, GroupFailure> {
    let mut ctx = InferCtx::new(symbols, config);
    let blame = |ctx: &InferCtx<'_>, error: SemanticError| GroupFailure::Semantic {
        item: members
            .get(ctx.current)
            .map(|m| m.name.clone())
            .unwrap_or_default(),
        error,
    };

    let mut member_types = Vec::new();
    for m in members {
        let params = m
            .sig
            .params
            .iter()
            .map(|p| p.clone().unwrap_or_else(|| ctx.fresh()))
            .collect();
        let ret = m.sig.ret.clone().unwrap_or_else(|| ctx.fresh());
        let fn_ty = Type::func(params, ret);
        ctx.group.insert(m.name.clone(), fn_ty.clone());
        member_types.push(fn_ty);
    }

    let mut drafts = Vec::new();
    for (index, (m, fn_ty)) in members.iter().zip(&member_types).enumerate() {
        ctx.current = index;
        let draft = ctx
            .infer_function(m, fn_ty)
            .and_then(|d| ctx.solve().map(|()| d))
            .map_err(|e| blame(&ctx, e))?;
        drafts.push(draft);
    }

    if let Some(m) = ctx.pending_methods.first() {
        let receiver = ctx.subst.apply(&m.receiver);
        let error = SemanticError::new(
            ErrorKind::AnnotationRequired,
            m.span,
            format!(
                "type annotations needed: cannot resolve method `{}` on `{receiver}`",
                m.method
            ),
        )
        .involving(receiver.to_string());
        return Err(blame(&ctx, error));
    }

    let mut member_vars = BTreeSet::new();
    for d in &drafts {
        member_vars.extend(ctx.subst.apply(&d.fn_ty).free_vars());
    }
    ctx.absorb_obligations(&member_vars)
        .map_err(|e| blame(&ctx, e))?;

    if config.verify_invariants {
        ctx.subst.verify_idempotent().map_err(|message| {
            GroupFailure::Internal(InternalError {
                message,
                item: members
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                state: ctx.subst.dump(),
            })
        })?;
    }

    let mut out = Vec::new();
    for (index, (m, mut draft)) in members.iter().zip(drafts).enumerate() {
        let scheme = ctx.export(&draft.fn_ty, &m.sig);
        draft.body.zonk(&ctx.subst);
        draft.body.fill_dispatch(&ctx.dispatch);
        for p in &mut draft.params {
            p.ty = ctx.subst.apply(&p.ty);
        }
        let errors = exhaustive::check_body(&draft.body, symbols);
        let obligations = ctx
            .obligations
            .iter()
            .filter(|o| o.item == index)
            .map(|o| Obligation {
                ty: ctx.subst.apply(&o.ty),
                ..o.clone()
            })
            .collect();
        tracing::debug!(item = %m.name, scheme = %scheme, "inferred");
        out.push(InferredItem {
            name: m.name.clone(),
            scheme: scheme.clone(),
            function: TypedFunction {
                name: m.name.clone(),
                span: m.def.span,
                scheme,
                params: draft.params,
                ret: ctx.subst.apply(&draft.ret),
                body: draft.body,
                assumptions: m.sig.assumptions(),
                ownership: Vec::new(),
            },
            obligations,
            errors,
        });
    }
    Ok(out)
}

impl<'a> InferCtx<'a> {
    pub fn new(symbols: &'a SymbolTable, config: &'a CheckerConfig) -> Self {
        Self {
            symbols,
            config,
            next_var: 0,
            subst: Substitution::new(),
            constraints: ConstraintSet::new(),
            pending_methods: Vec::new(),
            obligations: Vec::new(),
            dispatch: Vec::new(),
            returns: Vec::new(),
            group: BTreeMap::new(),
            scope: TypeScope::default(),
            assumptions: Vec::new(),
            current: 0,
        }
    }

    fn fresh_id(&mut self) -> TyVarId {
        let id = TyVarId(self.next_var);
        self.next_var += 1;
        id
    }

    fn fresh(&mut self) -> Type {
        Type::Variable(TyVar::new(self.fresh_id()))
    }

    fn equal(&mut self, expected: Type, found: Type, span: Span) {
        self.constraints.equal(expected, found, span);
    }

    fn bound(&mut self, ty: Type, trait_name: &str, span: Span) {
        if let Type::Variable(v) = &ty {
            self.subst.add_bound(v.id, trait_name);
        }
        self.constraints.push(Constraint::Bound {
            ty,
            trait_name: trait_name.to_string(),
            span,
        });
    }

    fn instantiate(&mut self, scheme: &Scheme, span: Span) -> Type {
        let mut next = self.next_var;
        let (ty, obligations) = instantiate(scheme, &mut || {
            next += 1;
            TyVarId(next - 1)
        });
        self.next_var = next;
        for (t, trait_name) in obligations {
            self.bound(t, &trait_name, span);
        }
        ty
    }

    /// Scheme published for a group member: its rigid parameters become
    /// bounded variables and every remaining variable is quantified.
    fn export(&mut self, fn_ty: &Type, sig: &Signature) -> Scheme {
        let applied = self.subst.apply(fn_ty);
        let mut map = BTreeMap::new();
        for p in &sig.type_params {
            let id = self.fresh_id();
            for b in &p.bounds {
                self.subst.add_bound(id, b);
            }
            map.insert(p.name.clone(), Type::Variable(TyVar::new(id)));
        }
        let ty = applied.substitute_params(&map);
        generalize(&ty, &BTreeSet::new(), &self.subst)
    }

    /// Solves pending equalities and resolves method calls whose receiver
    /// has become known, until neither makes progress.
    pub fn solve(&mut self) -> Result<(), SemanticError> {
        loop {
            while let Some(c) = self.constraints.next_unsolved() {
                match c {
                    Constraint::Equal { left, right, span } => {
                        unify(&mut self.subst, &left, &right, span)?
                    }
                    Constraint::Bound {
                        ty,
                        trait_name,
                        span,
                    } => self.obligations.push(Obligation {
                        ty,
                        trait_name,
                        span,
                        item: self.current,
                    }),
                    Constraint::Method(m) => self.pending_methods.push(m),
                }
            }
            let pending = std::mem::take(&mut self.pending_methods);
            let resolver = TraitResolver::new(self.symbols, self.assumptions.clone());
            let mut progress = false;
            for m in pending {
                let receiver = self.subst.apply(&m.receiver);
                match resolver.lookup_method(&receiver, &m.method, m.span)? {
                    MethodLookup::Found(target) => {
                        self.apply_method(&m, target)?;
                        progress = true;
                    }
                    MethodLookup::Unknown => self.pending_methods.push(m),
                }
            }
            if !progress && !self.constraints.has_unsolved() {
                return Ok(());
            }
        }
    }

    fn apply_method(&mut self, m: &MethodConstraint, target: MethodTarget) -> Result<(), SemanticError> {
        let fn_ty = self.instantiate(&target.sig, m.span);
        let Type::Function(params, ret) = fn_ty else {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                m.span,
                format!("`{}` is not a method", m.method),
            ));
        };
        let Some((self_param, rest)) = params.split_first() else {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                m.span,
                format!("`{}` is an associated function, not a method", m.method),
            ));
        };
        if rest.len() != m.args.len() {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                m.span,
                format!(
                    "method `{}` takes {} argument(s) but {} were supplied",
                    m.method,
                    rest.len(),
                    m.args.len()
                ),
            ));
        }
        let self_part = match (self_param, target.mode) {
            (Type::Reference(_, _, inner), ReceiverMode::Shared | ReceiverMode::Exclusive) => {
                (**inner).clone()
            }
            (other, _) => other.clone(),
        };
        self.equal(self_part, target.self_ty.clone(), m.span);
        for ((p, a), s) in rest.iter().zip(&m.args).zip(&m.arg_spans) {
            self.equal(p.clone(), a.clone(), *s);
        }
        self.equal(m.ret.clone(), *ret, m.span);
        if let Some(slot) = self.dispatch.get_mut(m.slot) {
            *slot = Some((target.dispatch, target.mode));
        }
        Ok(())
    }

    /// Moves obligations on variables in `vars` into those variables' bound
    /// sets, so the schemes quantifying them carry the bound.
    fn absorb_obligations(&mut self, vars: &BTreeSet<TyVarId>) -> Result<(), SemanticError> {
        let resolver = TraitResolver::new(self.symbols, self.assumptions.clone());
        let mut work = std::mem::take(&mut self.obligations);
        work.reverse();
        let mut kept = Vec::new();
        while let Some(o) = work.pop() {
            // Literal widths are never abstracted over.
            if o.trait_name == "Integer" {
                kept.push(o);
                continue;
            }
            let ty = self.subst.apply(&o.ty);
            if let Type::Variable(v) = &ty {
                if vars.contains(&v.id) {
                    self.subst.add_bound(v.id, &o.trait_name);
                } else {
                    kept.push(o);
                }
                continue;
            }
            if ty.free_vars().is_disjoint(vars) {
                kept.push(o);
                continue;
            }
            match resolver.resolve_bound(&ty, &o.trait_name, o.span)? {
                Resolution::Satisfied => {}
                Resolution::Deferred(rest) => {
                    for (t, trait_name) in rest {
                        if t == ty && trait_name == o.trait_name {
                            kept.push(o.clone());
                        } else {
                            work.push(Obligation {
                                ty: t,
                                trait_name,
                                ..o.clone()
                            });
                        }
                    }
                }
            }
        }
        self.obligations = kept;
        Ok(())
    }

    fn generalize_let(&mut self, env: &TypeEnv, ty: &Type) -> Result<Scheme, SemanticError> {
        let ty = self.subst.apply(ty);
        let mut env_vars = env.free_type_vars(&self.subst);
        for t in self.returns.iter().chain(self.group.values()) {
            env_vars.extend(self.subst.apply(t).free_vars());
        }
        // An unresolved method call may still fix these.
        for m in &self.pending_methods {
            for t in std::iter::once(&m.receiver).chain(&m.args).chain(std::iter::once(&m.ret)) {
                env_vars.extend(self.subst.apply(t).free_vars());
            }
        }
        // Integer literals are not generalized; an unresolved width must be annotated.
        for id in ty.free_vars() {
            if self.subst.bounds_of(id).contains("Integer") {
                env_vars.insert(id);
            }
        }
        let quantified: BTreeSet<TyVarId> = ty.free_vars().difference(&env_vars).copied().collect();
        if quantified.is_empty() {
            return Ok(Scheme::mono(ty));
        }
        self.absorb_obligations(&quantified)?;
        Ok(generalize(&ty, &env_vars, &self.subst))
    }

    fn annotation(&self, r: &grok_ast::TypeRef) -> Result<Type, SemanticError> {
        self.symbols.resolve(r, &self.scope)
    }

    fn infer_function(&mut self, m: &GroupMember<'_>, fn_ty: &Type) -> Result<Draft, SemanticError> {
        self.scope = m.sig.scope.clone();
        self.assumptions = m.sig.assumptions();
        let Type::Function(param_tys, ret) = fn_ty else {
            return Err(SemanticError::new(
                ErrorKind::TypeMismatch,
                m.def.span,
                format!("`{}` is not a function", m.name),
            ));
        };
        let mut env = TypeEnv::child(&Arc::new(TypeEnv::root()));
        let mut params = Vec::new();
        let mut seen = BTreeSet::new();
        for (p, ty) in m.def.params.iter().zip(param_tys) {
            if !seen.insert(p.name.node.as_str()) {
                return Err(SemanticError::new(
                    ErrorKind::DuplicateDefinition,
                    p.name.span,
                    format!("identifier `{}` is bound more than once in this parameter list", p.name.node),
                ));
            }
            env.bind(p.name.node.clone(), Scheme::mono(ty.clone()));
            params.push(TypedParam {
                span: p.span,
                name: p.name.node.clone(),
                mutable: p.mutable,
                ty: ty.clone(),
            });
        }
        let env = Arc::new(env);
        self.returns.push((**ret).clone());
        let body = self.infer_expr(&env, &m.def.body);
        self.returns.pop();
        let body = body?;
        if !body.diverges() {
            self.equal((**ret).clone(), body.ty.clone(), body_span(&m.def.body));
        }
        Ok(Draft {
            fn_ty: fn_ty.clone(),
            params,
            ret: (**ret).clone(),
            body,
        })
    }

    fn literal_type(&mut self, lit: &Literal, span: Span) -> Type {
        match lit {
            Literal::Int(_) => match self.config.int_literals {
                IntLiteralMode::DefaultI32 => Type::i32(),
                IntLiteralMode::RequireAnnotation => {
                    let v = self.fresh();
                    self.bound(v.clone(), "Integer", span);
                    v
                }
            },
            Literal::Float(_) => Type::prim("f64"),
            Literal::Str(_) => Type::prim("str"),
            Literal::Bool(_) => Type::bool(),
            Literal::Unit => Type::unit(),
        }
    }

    /// Solves what is pending and returns `ty` with the substitution applied.
    fn resolved(&mut self, ty: &Type) -> Result<Type, SemanticError> {
        self.solve()?;
        Ok(self.subst.apply(ty))
    }

    pub fn infer_expr(&mut self, env: &Arc<TypeEnv>, e: &Expr) -> Result<TypedExpr, SemanticError> {
        let symbols = self.symbols;
        let span = e.span;
        let (ty, kind) = match &e.kind {
            ExprKind::Literal(lit) => (self.literal_type(lit, span), TypedExprKind::Literal(lit.clone())),

            ExprKind::Ident(id) => {
                let name = id.node.as_str();
                if let Some(scheme) = env.lookup(name) {
                    (self.instantiate(scheme, span), TypedExprKind::Local(name.to_string()))
                } else if let Some(ty) = self.group.get(name) {
                    (ty.clone(), TypedExprKind::Global(name.to_string()))
                } else if let Some(scheme) = symbols.function(name) {
                    (self.instantiate(scheme, span), TypedExprKind::Global(name.to_string()))
                } else {
                    return Err(SemanticError::new(
                        ErrorKind::UnboundName,
                        id.span,
                        format!("cannot find value `{name}` in this scope"),
                    )
                    .involving(name));
                }
            }

            ExprKind::Unary { op, expr } => {
                let inner = self.infer_expr(env, expr)?;
                if *op == UnaryOp::Not {
                    self.equal(Type::bool(), inner.ty.clone(), expr.span);
                }
                (
                    inner.ty.clone(),
                    TypedExprKind::Unary {
                        op: *op,
                        expr: Box::new(inner),
                    },
                )
            }

            ExprKind::Binary { left, op, right } => {
                let l = self.infer_expr(env, left)?;
                let r = self.infer_expr(env, right)?;
                let ty = match op {
                    BinOp::And | BinOp::Or => {
                        self.equal(Type::bool(), l.ty.clone(), left.span);
                        self.equal(Type::bool(), r.ty.clone(), right.span);
                        Type::bool()
                    }
                    op if op.is_comparison() => {
                        self.equal(l.ty.clone(), r.ty.clone(), right.span);
                        Type::bool()
                    }
                    _ => {
                        self.equal(l.ty.clone(), r.ty.clone(), right.span);
                        l.ty.clone()
                    }
                };
                (
                    ty,
                    TypedExprKind::Binary {
                        left: Box::new(l),
                        op: *op,
                        right: Box::new(r),
                    },
                )
            }

            ExprKind::Call { callee, args } => {
                let callee_t = self.infer_expr(env, callee)?;
                let mut typed_args = Vec::new();
                for a in args {
                    typed_args.push(self.infer_expr(env, a)?);
                }
                let callee_ty = self.resolved(&callee_t.ty)?;
                let ret = match callee_ty {
                    Type::Function(params, ret) => {
                        if params.len() != typed_args.len() {
                            return Err(SemanticError::new(
                                ErrorKind::TypeMismatch,
                                span,
                                format!(
                                    "this function takes {} argument(s) but {} were supplied",
                                    params.len(),
                                    typed_args.len()
                                ),
                            )
                            .involving(Type::Function(params, ret).to_string()));
                        }
                        for (p, a) in params.into_iter().zip(&typed_args) {
                            self.equal(p, a.ty.clone(), a.span);
                        }
                        *ret
                    }
                    other => {
                        let ret = self.fresh();
                        let arg_tys = typed_args.iter().map(|a| a.ty.clone()).collect();
                        self.equal(other, Type::func(arg_tys, ret.clone()), span);
                        ret
                    }
                };
                (
                    ret,
                    TypedExprKind::Call {
                        callee: Box::new(callee_t),
                        args: typed_args,
                    },
                )
            }

            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => {
                let recv = self.infer_expr(env, receiver)?;
                let mut typed_args = Vec::new();
                for a in args {
                    typed_args.push(self.infer_expr(env, a)?);
                }
                let ret = self.fresh();
                let slot = self.dispatch.len();
                self.dispatch.push(None);
                self.constraints.push(Constraint::Method(MethodConstraint {
                    receiver: recv.ty.clone(),
                    method: method.node.clone(),
                    args: typed_args.iter().map(|a| a.ty.clone()).collect(),
                    arg_spans: typed_args.iter().map(|a| a.span).collect(),
                    ret: ret.clone(),
                    span: method.span,
                    slot,
                }));
                (
                    ret,
                    TypedExprKind::MethodCall {
                        receiver: Box::new(recv),
                        method: method.node.clone(),
                        args: typed_args,
                        dispatch: Dispatch::Pending(slot),
                        mode: ReceiverMode::ByValue,
                    },
                )
            }

            ExprKind::Lambda { params, body } => {
                let mut child = TypeEnv::child(env);
                let mut typed_params = Vec::new();
                for p in params {
                    let ty = match &p.ty {
                        Some(r) => self.annotation(r)?,
                        None => self.fresh(),
                    };
                    child.bind(p.name.node.clone(), Scheme::mono(ty.clone()));
                    typed_params.push(TypedParam {
                        span: p.span,
                        name: p.name.node.clone(),
                        mutable: p.mutable,
                        ty,
                    });
                }
                let child = Arc::new(child);
                let ret = self.fresh();
                self.returns.push(ret.clone());
                let body_t = self.infer_expr(&child, body);
                self.returns.pop();
                let body_t = body_t?;
                if !body_t.diverges() {
                    self.equal(ret.clone(), body_t.ty.clone(), body_span(body));
                }
                let ty = Type::func(typed_params.iter().map(|p| p.ty.clone()).collect(), ret);
                (
                    ty,
                    TypedExprKind::Lambda {
                        params: typed_params,
                        body: Box::new(body_t),
                    },
                )
            }

            ExprKind::Block(block) => {
                let typed = self.infer_block(env, block)?;
                let ty = match &typed.tail {
                    Some(t) => t.ty.clone(),
                    None if typed.diverges() => self.fresh(),
                    None => Type::unit(),
                };
                (ty, TypedExprKind::Block(typed))
            }

            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.infer_expr(env, cond)?;
                self.equal(Type::bool(), c.ty.clone(), cond.span);
                let t = self.infer_expr(env, then_branch)?;
                let (ty, else_t) = match else_branch {
                    Some(else_e) => {
                        let el = self.infer_expr(env, else_e)?;
                        let ty = if t.diverges() {
                            el.ty.clone()
                        } else {
                            if !el.diverges() {
                                self.equal(t.ty.clone(), el.ty.clone(), body_span(else_e));
                            }
                            t.ty.clone()
                        };
                        (ty, Some(Box::new(el)))
                    }
                    None => {
                        if !t.diverges() {
                            self.equal(Type::unit(), t.ty.clone(), body_span(then_branch));
                        }
                        (Type::unit(), None)
                    }
                };
                (
                    ty,
                    TypedExprKind::If {
                        cond: Box::new(c),
                        then_branch: Box::new(t),
                        else_branch: else_t,
                    },
                )
            }

            ExprKind::Match { scrutinee, arms } => {
                let s = self.infer_expr(env, scrutinee)?;
                let result = self.fresh();
                let mut typed_arms = Vec::new();
                for arm in arms {
                    let pat = self.check_pattern(&arm.pat, &s.ty)?;
                    let mut child = TypeEnv::child(env);
                    let mut seen = BTreeSet::new();
                    for (name, at, ty) in pat.bindings() {
                        if !seen.insert(name.clone()) {
                            return Err(SemanticError::new(
                                ErrorKind::DuplicateDefinition,
                                at,
                                format!("identifier `{name}` is bound more than once in the same pattern"),
                            ));
                        }
                        child.bind(name, Scheme::mono(ty));
                    }
                    let body = self.infer_expr(&Arc::new(child), &arm.body)?;
                    if !body.diverges() {
                        self.equal(result.clone(), body.ty.clone(), body_span(&arm.body));
                    }
                    typed_arms.push(TypedArm {
                        span: arm.span,
                        pat,
                        body,
                    });
                }
                (
                    result,
                    TypedExprKind::Match {
                        scrutinee: Box::new(s),
                        arms: typed_arms,
                    },
                )
            }

            ExprKind::StructLit { name, fields } => {
                let Some(info) = symbols.structs.get(&name.node) else {
                    return Err(SemanticError::new(
                        ErrorKind::UnboundName,
                        name.span,
                        format!("cannot find struct `{}`", name.node),
                    )
                    .involving(name.node.clone()));
                };
                let args = info.params.iter().map(|_| self.fresh()).collect();
                let sty = symbols.struct_type(&name.node, args)?;
                let Type::Struct(st) = &sty else {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        name.span,
                        format!("`{}` is not a struct", name.node),
                    ));
                };
                let mut seen = BTreeSet::new();
                let mut typed_fields = Vec::new();
                for (fname, fexpr) in fields {
                    let Some(declared) = st.field(&fname.node) else {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            fname.span,
                            format!("struct `{}` has no field named `{}`", st.name, fname.node),
                        )
                        .involving(sty.to_string()));
                    };
                    if !seen.insert(fname.node.as_str()) {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            fname.span,
                            format!("field `{}` specified more than once", fname.node),
                        ));
                    }
                    let declared = declared.clone();
                    let value = self.infer_expr(env, fexpr)?;
                    self.equal(declared, value.ty.clone(), value.span);
                    typed_fields.push((fname.node.clone(), value));
                }
                let missing: Vec<String> = st
                    .fields
                    .iter()
                    .filter(|(n, _)| !seen.contains(n.as_str()))
                    .map(|(n, _)| format!("`{n}`"))
                    .collect();
                if !missing.is_empty() {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        format!("missing field(s) {} in initializer of `{}`", missing.join(", "), st.name),
                    )
                    .involving(sty.to_string()));
                }
                (
                    sty.clone(),
                    TypedExprKind::StructLit {
                        name: name.node.clone(),
                        fields: typed_fields,
                    },
                )
            }

            ExprKind::Variant {
                enum_name,
                variant,
                args,
            } => {
                let (ety, field_tys) = self.variant_shape(enum_name, variant)?;
                if field_tys.len() != args.len() {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        format!(
                            "`{}::{}` takes {} field(s) but {} were supplied",
                            enum_name.node,
                            variant.node,
                            field_tys.len(),
                            args.len()
                        ),
                    ));
                }
                let mut typed_args = Vec::new();
                for (a, fty) in args.iter().zip(field_tys) {
                    let value = self.infer_expr(env, a)?;
                    self.equal(fty, value.ty.clone(), value.span);
                    typed_args.push(value);
                }
                (
                    ety,
                    TypedExprKind::Variant {
                        enum_name: enum_name.node.clone(),
                        variant: variant.node.clone(),
                        args: typed_args,
                    },
                )
            }

            ExprKind::Field { base, field } => {
                let b = self.infer_expr(env, base)?;
                let base_ty = self.resolved(&b.ty)?;
                let target = symbols.expand(base_ty.deref_all())?;
                let ty = match &target {
                    Type::Struct(st) => st.field(&field.node).cloned(),
                    Type::Variable(_) => {
                        return Err(SemanticError::new(
                            ErrorKind::AnnotationRequired,
                            field.span,
                            format!(
                                "type annotations needed: cannot access field `{}` on a value of unknown type",
                                field.node
                            ),
                        ));
                    }
                    other => other
                        .tuple_elems()
                        .zip(field.node.parse::<usize>().ok())
                        .and_then(|(elems, i)| elems.get(i).cloned()),
                };
                let Some(ty) = ty else {
                    return Err(SemanticError::new(
                        ErrorKind::UnboundName,
                        field.span,
                        format!("no field `{}` on type `{target}`", field.node),
                    )
                    .involving(target.to_string()));
                };
                (
                    ty,
                    TypedExprKind::Field {
                        base: Box::new(b),
                        field: field.node.clone(),
                    },
                )
            }

            ExprKind::Tuple(elems) => {
                let mut typed = Vec::new();
                for el in elems {
                    typed.push(self.infer_expr(env, el)?);
                }
                (
                    Type::tuple(typed.iter().map(|t| t.ty.clone()).collect()),
                    TypedExprKind::Tuple(typed),
                )
            }

            ExprKind::Borrow { mutable, expr } => {
                let inner = self.infer_expr(env, expr)?;
                let m = if *mutable {
                    Mutability::Exclusive
                } else {
                    Mutability::Shared
                };
                (
                    Type::reference(m, inner.ty.clone()),
                    TypedExprKind::Borrow {
                        mutable: *mutable,
                        expr: Box::new(inner),
                    },
                )
            }

            ExprKind::Deref(expr) => {
                let inner = self.infer_expr(env, expr)?;
                let ty = match self.resolved(&inner.ty)? {
                    Type::Reference(_, _, pointee) => *pointee,
                    Type::Variable(_) => {
                        return Err(SemanticError::new(
                            ErrorKind::AnnotationRequired,
                            span,
                            "type annotations needed: cannot dereference a value of unknown type",
                        ));
                    }
                    other => {
                        return Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            span,
                            format!("type `{other}` cannot be dereferenced"),
                        )
                        .involving(other.to_string()));
                    }
                };
                (ty, TypedExprKind::Deref(Box::new(inner)))
            }

            ExprKind::Assign { target, value } => {
                let t = self.infer_expr(env, target)?;
                if !is_place(&t) {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        target.span,
                        "invalid left-hand side of assignment",
                    ));
                }
                let v = self.infer_expr(env, value)?;
                self.equal(t.ty.clone(), v.ty.clone(), v.span);
                (
                    Type::unit(),
                    TypedExprKind::Assign {
                        target: Box::new(t),
                        value: Box::new(v),
                    },
                )
            }

            ExprKind::Return(value) => {
                let ret = match self.returns.last() {
                    Some(r) => r.clone(),
                    None => self.fresh(),
                };
                let typed = match value {
                    Some(v) => {
                        let tv = self.infer_expr(env, v)?;
                        self.equal(ret, tv.ty.clone(), tv.span);
                        Some(Box::new(tv))
                    }
                    None => {
                        self.equal(ret, Type::unit(), span);
                        None
                    }
                };
                (self.fresh(), TypedExprKind::Return(typed))
            }
        };
        Ok(TypedExpr::new(span, ty, kind))
    }

    fn infer_block(&mut self, env: &Arc<TypeEnv>, block: &Block) -> Result<TypedBlock, SemanticError> {
        let mut scope = Arc::clone(env);
        let mut stmts = Vec::new();
        for stmt in &block.stmts {
            match stmt {
                Stmt::Let(l) => {
                    let (typed, next) = self.infer_let(&scope, l)?;
                    scope = next;
                    stmts.push(TypedStmt::Let(typed));
                }
                Stmt::Expr(e) => stmts.push(TypedStmt::Expr(self.infer_expr(&scope, e)?)),
            }
        }
        let tail = match &block.tail {
            Some(t) => Some(Box::new(self.infer_expr(&scope, t)?)),
            None => None,
        };
        Ok(TypedBlock {
            span: block.span,
            stmts,
            tail,
        })
    }

    fn infer_let(
        &mut self,
        env: &Arc<TypeEnv>,
        l: &LetStmt,
    ) -> Result<(TypedLet, Arc<TypeEnv>), SemanticError> {
        let name = l.name.node.clone();
        // A lambda may refer to itself, monomorphically.
        let init = if matches!(l.init.kind, ExprKind::Lambda { .. }) {
            let self_ty = self.fresh();
            let rec_env = TypeEnv::extend(env, name.clone(), Scheme::mono(self_ty.clone()));
            let init = self.infer_expr(&rec_env, &l.init)?;
            self.equal(self_ty, init.ty.clone(), l.init.span);
            init
        } else {
            self.infer_expr(env, &l.init)?
        };
        if let Some(ann) = &l.ty {
            let expected = self.annotation(ann)?;
            self.equal(expected, init.ty.clone(), init.span);
        }
        self.solve()?;
        let scheme = if l.mutable {
            Scheme::mono(self.subst.apply(&init.ty))
        } else {
            self.generalize_let(env, &init.ty)?
        };
        tracing::trace!(name = %name, scheme = %scheme, "let");
        let next = TypeEnv::extend(env, name.clone(), scheme.clone());
        Ok((
            TypedLet {
                span: l.span,
                name,
                name_span: l.name.span,
                mutable: l.mutable,
                ty: self.subst.apply(&init.ty),
                scheme,
                init,
            },
            next,
        ))
    }

    /// Instantiates an enum at fresh arguments and returns the enum type and
    /// the variant's field types.
    fn variant_shape(
        &mut self,
        enum_name: &grok_ast::Ident,
        variant: &grok_ast::Ident,
    ) -> Result<(Type, Vec<Type>), SemanticError> {
        let symbols = self.symbols;
        let Some(info) = symbols.enums.get(&enum_name.node) else {
            return Err(SemanticError::new(
                ErrorKind::UnboundName,
                enum_name.span,
                format!("cannot find enum `{}`", enum_name.node),
            )
            .involving(enum_name.node.clone()));
        };
        let args: Vec<Type> = info.params.iter().map(|_| self.fresh()).collect();
        let fields = match symbols.variant_fields(&enum_name.node, &variant.node, &args) {
            Some(fields) => fields?,
            None => {
                return Err(SemanticError::new(
                    ErrorKind::UnboundName,
                    variant.span,
                    format!("no variant named `{}` in enum `{}`", variant.node, enum_name.node),
                )
                .involving(variant.node.clone()));
            }
        };
        Ok((Type::Generic(enum_name.node.clone(), args), fields))
    }

    fn check_pattern(&mut self, pat: &Pattern, expected: &Type) -> Result<TypedPattern, SemanticError> {
        let symbols = self.symbols;
        let span = pat.span();
        let kind = match pat {
            Pattern::Wildcard { .. } => PatternKind::Wildcard,
            Pattern::Binding(id) => PatternKind::Binding(id.node.clone()),
            Pattern::Literal { value, .. } => {
                let ty = self.literal_type(value, span);
                self.equal(expected.clone(), ty, span);
                PatternKind::Literal(value.clone())
            }
            Pattern::Tuple { elems, .. } => {
                let vars: Vec<Type> = elems.iter().map(|_| self.fresh()).collect();
                self.equal(expected.clone(), Type::tuple(vars.clone()), span);
                let mut typed = Vec::new();
                for (p, v) in elems.iter().zip(&vars) {
                    typed.push(self.check_pattern(p, v)?);
                }
                PatternKind::Tuple(typed)
            }
            Pattern::Variant {
                enum_name,
                variant,
                fields,
                ..
            } => {
                let (ety, field_tys) = self.variant_shape(enum_name, variant)?;
                if field_tys.len() != fields.len() {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        format!(
                            "this pattern has {} field(s), but `{}::{}` has {}",
                            fields.len(),
                            enum_name.node,
                            variant.node,
                            field_tys.len()
                        ),
                    ));
                }
                self.equal(expected.clone(), ety, span);
                let mut typed = Vec::new();
                for (p, fty) in fields.iter().zip(&field_tys) {
                    typed.push(self.check_pattern(p, fty)?);
                }
                PatternKind::Variant {
                    enum_name: enum_name.node.clone(),
                    variant: variant.node.clone(),
                    fields: typed,
                }
            }
            Pattern::Struct { name, fields, .. } => {
                let Some(info) = symbols.structs.get(&name.node) else {
                    return Err(SemanticError::new(
                        ErrorKind::UnboundName,
                        name.span,
                        format!("cannot find struct `{}`", name.node),
                    )
                    .involving(name.node.clone()));
                };
                let args = info.params.iter().map(|_| self.fresh()).collect();
                let sty = symbols.struct_type(&name.node, args)?;
                self.equal(expected.clone(), sty.clone(), span);
                let Type::Struct(st) = &sty else {
                    return Err(SemanticError::new(
                        ErrorKind::TypeMismatch,
                        name.span,
                        format!("`{}` is not a struct", name.node),
                    ));
                };
                let mut seen = BTreeSet::new();
                let mut typed = Vec::new();
                for (fname, fpat) in fields {
                    let Some(fty) = st.field(&fname.node) else {
                        return Err(SemanticError::new(
                            ErrorKind::UnboundName,
                            fname.span,
                            format!("struct `{}` has no field named `{}`", st.name, fname.node),
                        ));
                    };
                    if !seen.insert(fname.node.as_str()) {
                        return Err(SemanticError::new(
                            ErrorKind::DuplicateDefinition,
                            fname.span,
                            format!("field `{}` bound more than once in this pattern", fname.node),
                        ));
                    }
                    let fty = fty.clone();
                    typed.push((fname.node.clone(), self.check_pattern(fpat, &fty)?));
                }
                PatternKind::Struct {
                    name: name.node.clone(),
                    fields: typed,
                }
            }
        };
        Ok(TypedPattern {
            span,
            ty: expected.clone(),
            kind,
        })
    }
}

/// Span used when a whole body is compared against an expected type: the
/// tail expression for blocks that have one.
fn body_span(e: &Expr) -> Span {
    match &e.kind {
        ExprKind::Block(b) => match &b.tail {
            Some(t) => body_span(t),
            None => b.span,
        },
        _ => e.span,
    }
}

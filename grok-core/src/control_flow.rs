#![forbid(unsafe_code)]

//! Control-flow facts for the ownership verifier.
//!
//! `PathState` is the per-path part of the verifier's state, split at
//! branches and merged after them. `Liveness` is the first verifier pass: it
//! numbers program points, resolves every use to a binding and records which
//! points sit in mutually exclusive branch arms.

use std::collections::{BTreeMap, HashMap};

use grok_ast::Span;

use crate::ownership_enforcement::{BindingId, BindingInfo, MoveState, Origins, Point};
use crate::typed::{TypedExpr, TypedExprKind, TypedFunction, TypedStmt};
use crate::types::Type;

/// Ownership state along one control-flow path.
#[derive(Clone, Debug, Default)]
pub struct PathState {
    pub moves: BTreeMap<BindingId, MoveState>,
    /// Origins currently carried by each binding's value.
    pub origins: BTreeMap<BindingId, Origins>,
    /// The path ended in `return`.
    pub diverged: bool,
}

impl PathState {
    pub fn origins_of(&self, id: BindingId) -> Origins {
        self.origins.get(&id).cloned().unwrap_or_default()
    }

    /// Joins the states at the end of alternative branches.
    ///
    /// Diverged paths do not contribute. A binding moved on every remaining
    /// path is `Moved`; moved on only some of them it is `MaybeMoved`.
    pub fn merge(paths: Vec<PathState>) -> PathState {
        let live: Vec<&PathState> = paths.iter().filter(|p| !p.diverged).collect();
        if live.is_empty() {
            let mut out = paths.into_iter().next().unwrap_or_default();
            out.diverged = true;
            return out;
        }

        let mut moves = BTreeMap::new();
        let mut touched: Vec<BindingId> = live.iter().flat_map(|p| p.moves.keys().copied()).collect();
        touched.sort();
        touched.dedup();
        for id in touched {
            let states: Vec<MoveState> = live.iter().filter_map(|p| p.moves.get(&id).copied()).collect();
            let Some(first) = states.first() else {
                continue;
            };
            let everywhere = states.len() == live.len()
                && states.iter().all(|s| matches!(s, MoveState::Moved { .. }));
            let merged = if everywhere {
                MoveState::Moved { at: first.at() }
            } else {
                MoveState::MaybeMoved { at: first.at() }
            };
            moves.insert(id, merged);
        }

        let mut origins: BTreeMap<BindingId, Origins> = BTreeMap::new();
        for p in &live {
            for (id, o) in &p.origins {
                origins.entry(*id).or_default().extend(o.iter().cloned());
            }
        }

        PathState {
            moves,
            origins,
            diverged: false,
        }
    }
}

/// Results of the first pass over a function body.
#[derive(Debug, Default)]
pub struct Liveness {
    pub bindings: Vec<BindingInfo>,
    /// Use points of each binding, ascending.
    pub uses: Vec<Vec<Point>>,
    /// Binding referenced by each `Local` expression, by point.
    pub locals: HashMap<Point, BindingId>,
    /// Point ranges (inclusive) of the alternatives of each branch.
    arm_groups: Vec<Vec<(Point, Point)>>,
    points: Point,
    scope: Vec<(String, BindingId)>,
    lambdas: Vec<Point>,
}

impl Liveness {
    pub fn compute(func: &TypedFunction, is_copy: &dyn Fn(&Type) -> bool) -> Self {
        let mut l = Liveness::default();
        for p in &func.params {
            l.declare(&p.name, p.span, &p.ty, is_copy);
        }
        l.expr(&func.body, is_copy);
        l
    }

    /// Total number of points in the body.
    pub fn len(&self) -> Point {
        self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points == 0
    }

    /// Whether execution at `from` can later reach `to`.
    pub fn reachable(&self, from: Point, to: Point) -> bool {
        if to <= from {
            return false;
        }
        let arm = |g: &[(Point, Point)], p: Point| g.iter().position(|(s, e)| *s <= p && p <= *e);
        !self.arm_groups.iter().any(|g| match (arm(g, from), arm(g, to)) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        })
    }

    /// Whether `id` is used at a point reachable from `from`.
    pub fn used_after(&self, id: BindingId, from: Point) -> bool {
        self.uses
            .get(id.0)
            .is_some_and(|us| us.iter().any(|u| self.reachable(from, *u)))
    }

    fn next(&mut self) -> Point {
        let p = self.points;
        self.points += 1;
        p
    }

    fn declare(&mut self, name: &str, span: Span, ty: &Type, is_copy: &dyn Fn(&Type) -> bool) {
        let id = BindingId(self.bindings.len());
        self.bindings.push(BindingInfo {
            name: name.to_string(),
            span,
            ty: ty.clone(),
            copy: is_copy(ty),
            lambda: self.lambdas.last().copied(),
        });
        self.uses.push(Vec::new());
        self.scope.push((name.to_string(), id));
    }

    fn lookup(&self, name: &str) -> Option<BindingId> {
        self.scope.iter().rev().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    fn expr(&mut self, e: &TypedExpr, is_copy: &dyn Fn(&Type) -> bool) {
        let p = self.next();
        match &e.kind {
            TypedExprKind::Literal(_) | TypedExprKind::Global(_) => {}
            TypedExprKind::Local(name) => {
                if let Some(id) = self.lookup(name) {
                    self.locals.insert(p, id);
                    self.uses[id.0].push(p);
                }
            }
            TypedExprKind::Unary { expr, .. }
            | TypedExprKind::Borrow { expr, .. }
            | TypedExprKind::Deref(expr) => self.expr(expr, is_copy),
            TypedExprKind::Binary { left, right, .. } => {
                self.expr(left, is_copy);
                self.expr(right, is_copy);
            }
            TypedExprKind::Call { callee, args } => {
                self.expr(callee, is_copy);
                args.iter().for_each(|a| self.expr(a, is_copy));
            }
            TypedExprKind::MethodCall { receiver, args, .. } => {
                self.expr(receiver, is_copy);
                args.iter().for_each(|a| self.expr(a, is_copy));
            }
            TypedExprKind::Lambda { params, body } => {
                let mark = self.scope.len();
                self.lambdas.push(p);
                for param in params {
                    self.declare(&param.name, param.span, &param.ty, is_copy);
                }
                self.expr(body, is_copy);
                self.lambdas.pop();
                self.scope.truncate(mark);
            }
            TypedExprKind::Block(block) => {
                let mark = self.scope.len();
                for stmt in &block.stmts {
                    match stmt {
                        TypedStmt::Let(l) => {
                            if matches!(l.init.kind, TypedExprKind::Lambda { .. }) {
                                self.declare(&l.name, l.name_span, &l.ty, is_copy);
                                self.expr(&l.init, is_copy);
                            } else {
                                self.expr(&l.init, is_copy);
                                self.declare(&l.name, l.name_span, &l.ty, is_copy);
                            }
                        }
                        TypedStmt::Expr(e) => self.expr(e, is_copy),
                    }
                }
                if let Some(t) = &block.tail {
                    self.expr(t, is_copy);
                }
                self.scope.truncate(mark);
            }
            TypedExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond, is_copy);
                let start = self.points;
                self.expr(then_branch, is_copy);
                let mut group = vec![(start, self.points - 1)];
                if let Some(else_e) = else_branch {
                    let start = self.points;
                    self.expr(else_e, is_copy);
                    group.push((start, self.points - 1));
                }
                self.arm_groups.push(group);
            }
            TypedExprKind::Match { scrutinee, arms } => {
                self.expr(scrutinee, is_copy);
                let mut group = Vec::new();
                for arm in arms {
                    let mark = self.scope.len();
                    let start = self.points;
                    for (name, span, ty) in arm.pat.bindings() {
                        self.declare(&name, span, &ty, is_copy);
                    }
                    self.expr(&arm.body, is_copy);
                    group.push((start, self.points - 1));
                    self.scope.truncate(mark);
                }
                self.arm_groups.push(group);
            }
            TypedExprKind::StructLit { fields, .. } => {
                fields.iter().for_each(|(_, f)| self.expr(f, is_copy));
            }
            TypedExprKind::Variant { args: elems, .. } | TypedExprKind::Tuple(elems) => {
                elems.iter().for_each(|x| self.expr(x, is_copy));
            }
            TypedExprKind::Field { base, .. } => self.expr(base, is_copy),
            TypedExprKind::Assign { target, value } => {
                self.expr(target, is_copy);
                self.expr(value, is_copy);
            }
            TypedExprKind::Return(value) => {
                if let Some(v) = value {
                    self.expr(v, is_copy);
                }
            }
        }
    }
}

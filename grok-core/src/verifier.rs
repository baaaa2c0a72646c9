#![forbid(unsafe_code)]

//! Ownership and borrow verification over a typed function.
//!
//! Two passes share one pre-order numbering of program points. The first
//! (`Liveness`) resolves uses and records where every binding is used; the
//! second walks the body in evaluation order, tracking moves per path and
//! loans globally. A loan is live while it sits in an active temporary frame
//! or while a binding whose value carries it is used later.

use std::collections::{BTreeMap, BTreeSet};

use grok_ast::Span;
use tracing::instrument;

use crate::control_flow::{Liveness, PathState};
use crate::error::{ErrorKind, InternalError, SemanticError};
use crate::move_tracking::{UseContext, ValueKind, binds_by_value, classify_type, is_place, reference_lifetime};
use crate::ownership_enforcement::{
    Access, BindingId, BindingInfo, CaptureKind, Loan, LoanId, MoveState, Origin, Origins,
    OwnershipFact, Point, UseAnnotation,
};
use crate::symbols::SymbolTable;
use crate::traits::TraitResolver;
use crate::typed::{ReceiverMode, TypedBlock, TypedExpr, TypedExprKind, TypedFunction, TypedStmt};
use crate::types::{Mutability, Type};

/// Result of verifying one function.
#[derive(Debug, Default)]
pub struct Verified {
    pub annotations: Vec<UseAnnotation>,
    /// Violations in source order.
    pub errors: Vec<SemanticError>,
}

#[instrument(skip_all, fields(item = %func.name))]
pub fn verify_function(func: &TypedFunction, symbols: &SymbolTable) -> Result<Verified, InternalError> {
    let resolver = TraitResolver::new(symbols, func.assumptions.clone());
    let is_copy = |t: &Type| resolver.is_copy(t);
    let live = Liveness::compute(func, &is_copy);
    let mut v = OwnershipVerifier {
        resolver: &resolver,
        func,
        live,
        state: PathState::default(),
        loans: Vec::new(),
        temps: vec![Vec::new()],
        points: 0,
        next_binding: 0,
        scope: Vec::new(),
        lambdas: Vec::new(),
        defining: Vec::new(),
        ret_lifetime: reference_lifetime(&func.ret)
            .and_then(|l| l.name())
            .map(str::to_string),
        annotations: Vec::new(),
        errors: Vec::new(),
        internal: None,
    };
    v.run();
    if let Some(e) = v.internal {
        return Err(e);
    }
    let mut errors = v.errors;
    errors.sort_by_key(|e| e.span);
    errors.dedup_by(|a, b| a.span == b.span && a.kind == b.kind && a.message == b.message);
    tracing::debug!(uses = v.annotations.len(), errors = errors.len(), "ownership verified");
    Ok(Verified {
        annotations: v.annotations,
        errors,
    })
}

/// Storage named by a place expression.
struct Place {
    /// Root binding; `None` when the place starts at a temporary.
    root: Option<BindingId>,
    /// The place is reached through a reference held by `root`.
    through_ref: bool,
    /// One of those references is shared, so the place is read-only.
    behind_shared: bool,
    /// The place is the root binding itself.
    whole: bool,
    /// Origins of the temporary the place starts at.
    origins: Origins,
}

impl Place {
    fn temporary(origins: Origins) -> Self {
        Self {
            root: None,
            through_ref: false,
            behind_shared: false,
            whole: false,
            origins,
        }
    }
}

struct LambdaFrame {
    point: Point,
    captures: BTreeMap<BindingId, (CaptureKind, Span)>,
}

enum Receiver {
    Value(Origins),
    Place(Place),
}

struct OwnershipVerifier<'a> {
    resolver: &'a TraitResolver<'a>,
    func: &'a TypedFunction,
    live: Liveness,
    state: PathState,
    loans: Vec<Loan>,
    /// Loans held by values under evaluation, one frame per statement.
    temps: Vec<Vec<LoanId>>,
    points: Point,
    next_binding: usize,
    /// Bindings in scope, innermost last.
    scope: Vec<BindingId>,
    lambdas: Vec<LambdaFrame>,
    /// Let bindings whose lambda initializer is being verified.
    defining: Vec<BindingId>,
    ret_lifetime: Option<String>,
    annotations: Vec<UseAnnotation>,
    errors: Vec<SemanticError>,
    internal: Option<InternalError>,
}

impl<'a> OwnershipVerifier<'a> {
    fn run(&mut self) {
        let func = self.func;
        for p in &func.params {
            let id = self.declare();
            if p.ty.contains_reference() {
                let lifetime = reference_lifetime(&p.ty)
                    .and_then(|l| l.name())
                    .map(str::to_string);
                self.state
                    .origins
                    .insert(id, [Origin::Param { binding: id, lifetime }].into_iter().collect());
            }
        }
        let result = match &func.body.kind {
            TypedExprKind::Block(b) => {
                self.next_point();
                self.block(b, true)
            }
            _ => self.expr(&func.body, UseContext::Move),
        };
        if !self.state.diverged {
            self.check_escape(&result, tail_span(&func.body));
        }
    }

    fn next_point(&mut self) -> Point {
        let p = self.points;
        self.points += 1;
        p
    }

    /// The most recently numbered point.
    fn cursor(&self) -> Point {
        self.points.saturating_sub(1)
    }

    fn declare(&mut self) -> BindingId {
        let id = BindingId(self.next_binding);
        self.next_binding += 1;
        self.scope.push(id);
        id
    }

    fn info(&self, id: BindingId) -> &BindingInfo {
        &self.live.bindings[id.0]
    }

    fn name(&self, id: BindingId) -> String {
        self.info(id).name.clone()
    }

    fn kind(&self, ty: &Type) -> ValueKind {
        classify_type(ty, self.resolver)
    }

    fn report(&mut self, error: SemanticError) {
        self.errors.push(error.in_item(self.func.name.clone()));
    }

    // Loans

    fn is_live(&self, loan: LoanId, at: Point) -> bool {
        self.temps.iter().any(|f| f.contains(&loan))
            || self
                .state
                .origins
                .iter()
                .any(|(b, os)| os.contains(&Origin::Loan(loan)) && self.live.used_after(*b, at))
    }

    fn live_loans_on(&self, target: BindingId) -> Vec<LoanId> {
        let at = self.cursor();
        (0..self.loans.len())
            .map(LoanId)
            .filter(|l| {
                let loan = &self.loans[l.0];
                loan.target == target
                    && (loan.point == at || self.live.reachable(loan.point, at))
                    && self.is_live(*l, at)
            })
            .collect()
    }

    fn fact(&mut self, id: BindingId) -> OwnershipFact {
        if self.state.moves.contains_key(&id) {
            return OwnershipFact::Moved;
        }
        let live = self.live_loans_on(id);
        let exclusive = live.iter().filter(|l| self.loans[l.0].mutable).count();
        let shared = live.len() - exclusive;
        // Loans made in alternative branches may both be carried past the
        // merge; only loans on one path must be exclusive.
        let breach = live.iter().any(|a| {
            live.iter().any(|b| {
                let (la, lb) = (&self.loans[a.0], &self.loans[b.0]);
                a < b
                    && (la.mutable || lb.mutable)
                    && (self.live.reachable(la.point, lb.point) || self.live.reachable(lb.point, la.point))
            })
        });
        if breach {
            if self.internal.is_none() {
                let state = live
                    .iter()
                    .map(|l| {
                        let loan = &self.loans[l.0];
                        format!("loan {} ({}) at {}", l.0, loan.describe(), loan.span)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                self.internal = Some(InternalError {
                    message: format!(
                        "ownership facts of `{}` are not exclusive: {exclusive} exclusive and {shared} shared loans live",
                        self.name(id)
                    ),
                    item: self.func.name.clone(),
                    state,
                });
            }
            return OwnershipFact::BorrowedExclusive;
        }
        match (exclusive, shared) {
            (0, 0) => OwnershipFact::Owned,
            (0, n) => OwnershipFact::BorrowedShared(u32::try_from(n).unwrap_or(u32::MAX)),
            _ => OwnershipFact::BorrowedExclusive,
        }
    }

    fn annotate(&mut self, id: BindingId, span: Span, access: Access) {
        let fact = self.fact(id);
        let name = self.name(id);
        self.annotations.push(UseAnnotation {
            span,
            name,
            access,
            fact,
        });
    }

    fn hold(&mut self, origins: &Origins) {
        if let Some(frame) = self.temps.last_mut() {
            for o in origins {
                if let Origin::Loan(l) = o {
                    frame.push(*l);
                }
            }
        }
    }

    fn temp_mark(&self) -> usize {
        self.temps.last().map_or(0, Vec::len)
    }

    /// Drops temporaries held since `mark` unless they flow into `keep`.
    fn release(&mut self, mark: usize, keep: &Origins) {
        if let Some(frame) = self.temps.last_mut() {
            let tail = frame.split_off(mark.min(frame.len()));
            frame.extend(tail.into_iter().filter(|l| keep.contains(&Origin::Loan(*l))));
        }
    }

    // Binding accesses

    fn captured(&self, id: BindingId) -> bool {
        match self.lambdas.last() {
            Some(frame) => self.info(id).lambda != Some(frame.point),
            None => false,
        }
    }

    fn capture(&mut self, id: BindingId, kind: CaptureKind, span: Span) {
        if let Some(frame) = self.lambdas.last_mut() {
            let entry = frame.captures.entry(id).or_insert((kind, span));
            entry.0 = entry.0.max(kind);
        }
    }

    fn conflict(&mut self, id: BindingId, span: Span, access: Access, loan: LoanId) {
        let name = self.name(id);
        let loan = self.loans[loan.0].clone();
        let message = match (access, loan.mutable) {
            (Access::SharedBorrow, _) => {
                format!("cannot borrow `{name}` as immutable because it is also borrowed as mutable")
            }
            (Access::ExclusiveBorrow, true) => {
                format!("cannot borrow `{name}` as mutable more than once at a time")
            }
            (Access::ExclusiveBorrow, false) => {
                format!("cannot borrow `{name}` as mutable because it is also borrowed as immutable")
            }
            (Access::Move, _) => format!("cannot move out of `{name}` because it is borrowed"),
            (Access::Assign, _) => format!("cannot assign to `{name}` because it is borrowed"),
            (Access::Read | Access::Copy, _) => {
                format!("cannot use `{name}` because it was mutably borrowed")
            }
        };
        self.report(
            SemanticError::new(ErrorKind::ConflictingBorrow, span, message)
                .involving(name.clone())
                .with_related(loan.span, format!("`{name}` is borrowed here as {}", loan.describe())),
        );
    }

    /// Reports a use of a moved binding; returns whether it was moved.
    fn check_moved(&mut self, id: BindingId, span: Span, what: &str) -> bool {
        let Some(state) = self.state.moves.get(&id).copied() else {
            return false;
        };
        let name = self.name(id);
        let message = match state {
            MoveState::Moved { .. } => format!("{what} of moved value: `{name}`"),
            MoveState::MaybeMoved { .. } => format!("{what} of possibly moved value: `{name}`"),
        };
        self.report(
            SemanticError::new(ErrorKind::UseAfterMove, span, message)
                .involving(name)
                .with_related(state.at(), "value moved here"),
        );
        true
    }

    fn use_binding(&mut self, id: BindingId, span: Span, access: Access) -> Origins {
        if self.captured(id) {
            let kind = if access == Access::Move {
                CaptureKind::ByValue
            } else {
                CaptureKind::Shared
            };
            self.capture(id, kind, span);
            return self.state.origins_of(id);
        }
        self.annotate(id, span, access);
        let origins = self.state.origins_of(id);
        if self.check_moved(id, span, "use") {
            return origins;
        }
        let live = self.live_loans_on(id);
        match access {
            Access::Move => {
                if let Some(l) = live.first() {
                    self.conflict(id, span, access, *l);
                } else {
                    self.state.moves.insert(id, MoveState::Moved { at: span });
                }
            }
            _ => {
                if let Some(l) = live.iter().find(|l| self.loans[l.0].mutable) {
                    let l = *l;
                    self.conflict(id, span, access, l);
                }
            }
        }
        origins
    }

    fn borrow(&mut self, id: BindingId, mutable: bool, span: Span) -> Origins {
        if self.captured(id) {
            let kind = if mutable {
                CaptureKind::Exclusive
            } else {
                CaptureKind::Shared
            };
            self.capture(id, kind, span);
            return Origins::new();
        }
        let access = if mutable {
            Access::ExclusiveBorrow
        } else {
            Access::SharedBorrow
        };
        self.annotate(id, span, access);
        if self.check_moved(id, span, "borrow") {
            return Origins::new();
        }
        let conflicting = self
            .live_loans_on(id)
            .into_iter()
            .find(|l| mutable || self.loans[l.0].mutable);
        if let Some(l) = conflicting {
            self.conflict(id, span, access, l);
            return Origins::new();
        }
        let loan = LoanId(self.loans.len());
        self.loans.push(Loan {
            target: id,
            mutable,
            span,
            point: self.cursor(),
        });
        if let Some(frame) = self.temps.last_mut() {
            frame.push(loan);
        }
        tracing::trace!(binding = %self.name(id), mutable, "loan");
        [Origin::Loan(loan)].into_iter().collect()
    }

    fn assign(&mut self, id: BindingId, whole: bool, value: Origins, span: Span) {
        if self.captured(id) {
            self.capture(id, CaptureKind::Exclusive, span);
            return;
        }
        self.annotate(id, span, Access::Assign);
        if !whole && self.check_moved(id, span, "assignment to part") {
            return;
        }
        if let Some(l) = self.live_loans_on(id).first().copied() {
            self.conflict(id, span, Access::Assign, l);
            return;
        }
        if whole {
            self.state.moves.remove(&id);
            self.state.origins.insert(id, value);
        } else {
            self.state.origins.entry(id).or_default().extend(value);
        }
    }

    // Places

    fn place(&mut self, e: &TypedExpr) -> Place {
        let p = self.next_point();
        self.place_at(e, p)
    }

    /// Resolves a place expression whose own point is `p`.
    fn place_at(&mut self, e: &TypedExpr, p: Point) -> Place {
        match &e.kind {
            TypedExprKind::Local(_) => Place {
                root: self.live.locals.get(&p).copied(),
                through_ref: false,
                behind_shared: false,
                whole: true,
                origins: Origins::new(),
            },
            TypedExprKind::Field { base, .. } => {
                let mut place = self.sub_place(base);
                if let Type::Reference(m, _, _) = &base.ty {
                    place.through_ref = true;
                    place.behind_shared |= *m == Mutability::Shared;
                }
                place.whole = false;
                place
            }
            TypedExprKind::Deref(inner) => {
                let mut place = self.sub_place(inner);
                place.through_ref = true;
                place.behind_shared |= matches!(inner.ty, Type::Reference(Mutability::Shared, _, _));
                place.whole = false;
                place
            }
            _ => Place::temporary(Origins::new()),
        }
    }

    fn sub_place(&mut self, e: &TypedExpr) -> Place {
        if is_place(e) {
            self.place(e)
        } else {
            Place::temporary(self.expr(e, UseContext::Read))
        }
    }

    fn borrow_place(&mut self, place: Place, mutable: bool, span: Span) -> Origins {
        if mutable && place.behind_shared {
            self.behind_shared_ref(place.root, span, "borrow data as mutable");
        }
        match place.root {
            None => place.origins,
            // Reborrow through a reference: the result points where it points.
            Some(id) if place.through_ref => self.use_binding(id, span, Access::Read),
            Some(id) => self.borrow(id, mutable, span),
        }
    }

    /// Uses the value stored at `place`, typed `ty`.
    fn read_place(&mut self, place: Place, ctx: UseContext, ty: &Type, span: Span) -> Origins {
        let carried = |o: Origins| if ty.contains_reference() { o } else { Origins::new() };
        let Some(id) = place.root else {
            return carried(place.origins);
        };
        let access = match (ctx, self.kind(ty)) {
            (UseContext::Read, _) => Access::Read,
            (_, ValueKind::Copyable) => Access::Copy,
            (UseContext::Argument, ValueKind::ExclusiveRef) => Access::Read,
            _ if place.through_ref => {
                let name = self.name(id);
                self.report(
                    SemanticError::new(
                        ErrorKind::ConflictingBorrow,
                        span,
                        format!("cannot move out of `{name}`, which is behind a reference"),
                    )
                    .involving(ty.to_string())
                    .involving(name),
                );
                Access::Read
            }
            _ => Access::Move,
        };
        carried(self.use_binding(id, span, access))
    }

    /// Reports a write or mutable borrow of data behind a shared reference.
    fn behind_shared_ref(&mut self, root: Option<BindingId>, span: Span, what: &str) {
        let mut err = match root {
            Some(id) => {
                let name = self.name(id);
                SemanticError::new(
                    ErrorKind::ConflictingBorrow,
                    span,
                    format!("cannot {what} through `{name}`, which is a shared reference"),
                )
                .involving(name)
            }
            None => SemanticError::new(
                ErrorKind::ConflictingBorrow,
                span,
                format!("cannot {what} behind a shared reference"),
            ),
        };
        if let Some(id) = root {
            if let Some(decl) = self.live.bindings.get(id.0).map(|b| b.span) {
                err = err.with_related(decl, "consider declaring this reference as `&mut`");
            }
        }
        self.report(err);
    }

    // Expressions

    fn expr(&mut self, e: &TypedExpr, ctx: UseContext) -> Origins {
        let p = self.next_point();
        match &e.kind {
            TypedExprKind::Literal(_) | TypedExprKind::Global(_) => Origins::new(),

            TypedExprKind::Local(_) => {
                let place = self.place_at(e, p);
                self.read_place(place, ctx, &e.ty, e.span)
            }

            TypedExprKind::Field { .. } | TypedExprKind::Deref(_) => {
                let place = self.place_at(e, p);
                self.read_place(place, ctx, &e.ty, e.span)
            }

            TypedExprKind::Unary { expr, .. } => {
                self.expr(expr, UseContext::Read);
                Origins::new()
            }

            TypedExprKind::Binary { left, right, .. } => {
                self.expr(left, UseContext::Read);
                self.expr(right, UseContext::Read);
                Origins::new()
            }

            TypedExprKind::Call { callee, args } => {
                let mark = self.temp_mark();
                let mut all = self.expr(callee, UseContext::Read);
                for a in args {
                    let o = self.expr(a, UseContext::Argument);
                    self.hold(&o);
                    all.extend(o);
                }
                let result = if e.ty.contains_reference() {
                    all
                } else {
                    Origins::new()
                };
                self.release(mark, &result);
                result
            }

            TypedExprKind::MethodCall {
                receiver,
                args,
                mode,
                ..
            } => {
                let mark = self.temp_mark();
                let recv = match mode {
                    ReceiverMode::ByValue => Receiver::Value(self.expr(receiver, UseContext::Argument)),
                    _ if matches!(receiver.ty, Type::Reference(..)) => {
                        let at = self.points;
                        let origins = self.expr(receiver, UseContext::Argument);
                        if *mode == ReceiverMode::Exclusive
                            && matches!(receiver.ty, Type::Reference(Mutability::Shared, _, _))
                        {
                            let root = match &receiver.kind {
                                TypedExprKind::Local(_) => self.live.locals.get(&at).copied(),
                                _ => None,
                            };
                            self.behind_shared_ref(root, receiver.span, "borrow data as mutable");
                        }
                        Receiver::Value(origins)
                    }
                    _ if is_place(receiver) => Receiver::Place(self.place(receiver)),
                    _ => Receiver::Value(self.expr(receiver, UseContext::Read)),
                };
                if let Receiver::Value(o) = &recv {
                    self.hold(o);
                }
                let mut all = Origins::new();
                for a in args {
                    let o = self.expr(a, UseContext::Argument);
                    self.hold(&o);
                    all.extend(o);
                }
                // The receiver is borrowed once the arguments are evaluated.
                let recv = match recv {
                    Receiver::Value(o) => o,
                    Receiver::Place(place) => {
                        let o = self.borrow_place(place, *mode == ReceiverMode::Exclusive, receiver.span);
                        self.hold(&o);
                        o
                    }
                };
                all.extend(recv);
                let result = if e.ty.contains_reference() {
                    all
                } else {
                    Origins::new()
                };
                self.release(mark, &result);
                result
            }

            TypedExprKind::Lambda { params, body } => self.lambda(p, e.span, params.len(), body),

            TypedExprKind::Block(block) => self.block(block, false),

            TypedExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond, UseContext::Read);
                let before = self.state.clone();
                let mut result = self.expr(then_branch, ctx);
                let after_then = std::mem::replace(&mut self.state, before);
                if let Some(else_e) = else_branch {
                    result.extend(self.expr(else_e, ctx));
                }
                let after_else = std::mem::take(&mut self.state);
                self.state = PathState::merge(vec![after_then, after_else]);
                result
            }

            TypedExprKind::Match { scrutinee, arms } => {
                let resolver = self.resolver;
                let is_copy = |t: &Type| resolver.is_copy(t);
                let by_value = arms.iter().any(|a| binds_by_value(&a.pat, &is_copy));
                let scrutinee_ctx = if by_value {
                    UseContext::Move
                } else {
                    UseContext::Read
                };
                let scrutinee_origins = self.expr(scrutinee, scrutinee_ctx);
                let before = self.state.clone();
                let mut paths = Vec::new();
                let mut result = Origins::new();
                for arm in arms {
                    self.state = before.clone();
                    let mark = self.scope.len();
                    for (_, _, ty) in arm.pat.bindings() {
                        let id = self.declare();
                        if ty.contains_reference() {
                            self.state.origins.insert(id, scrutinee_origins.clone());
                        }
                    }
                    result.extend(self.expr(&arm.body, ctx));
                    self.scope.truncate(mark);
                    paths.push(std::mem::take(&mut self.state));
                }
                self.state = if paths.is_empty() {
                    before
                } else {
                    PathState::merge(paths)
                };
                result
            }

            TypedExprKind::StructLit { fields, .. } => {
                let mut result = Origins::new();
                for (_, f) in fields {
                    result.extend(self.expr(f, UseContext::Move));
                }
                result
            }

            TypedExprKind::Variant { args: elems, .. } | TypedExprKind::Tuple(elems) => {
                let mut result = Origins::new();
                for x in elems {
                    result.extend(self.expr(x, UseContext::Move));
                }
                result
            }

            TypedExprKind::Borrow { mutable, expr } => {
                if is_place(expr) {
                    let place = self.place(expr);
                    self.borrow_place(place, *mutable, e.span)
                } else {
                    self.expr(expr, UseContext::Read)
                }
            }

            TypedExprKind::Assign { target, value } => {
                let place = self.sub_place(target);
                let value_origins = self.expr(value, UseContext::Move);
                if place.behind_shared {
                    self.behind_shared_ref(place.root, target.span, "assign");
                }
                if let Some(id) = place.root {
                    if place.through_ref {
                        self.use_binding(id, target.span, Access::Read);
                    } else {
                        self.assign(id, place.whole, value_origins, target.span);
                    }
                }
                Origins::new()
            }

            TypedExprKind::Return(value) => {
                let origins = match value {
                    Some(v) => self.expr(v, UseContext::Move),
                    None => Origins::new(),
                };
                if self.lambdas.is_empty() {
                    let span = value.as_ref().map_or(e.span, |v| v.span);
                    self.check_escape(&origins, span);
                }
                self.state.diverged = true;
                Origins::new()
            }
        }
    }

    fn lambda(&mut self, p: Point, span: Span, params: usize, body: &TypedExpr) -> Origins {
        self.lambdas.push(LambdaFrame {
            point: p,
            captures: BTreeMap::new(),
        });
        let mark = self.scope.len();
        for _ in 0..params {
            self.declare();
        }
        let diverged = self.state.diverged;
        self.temps.push(Vec::new());
        self.expr(body, UseContext::Move);
        self.temps.pop();
        self.state.diverged = diverged;
        self.scope.truncate(mark);
        let Some(frame) = self.lambdas.pop() else {
            return Origins::new();
        };

        let mut origins = Origins::new();
        for (id, (kind, _)) in frame.captures {
            if self.defining.contains(&id) {
                continue;
            }
            let copy = self.info(id).copy;
            let o = match kind {
                CaptureKind::ByValue if !copy => self.use_binding(id, span, Access::Move),
                CaptureKind::ByValue | CaptureKind::Shared => self.borrow(id, false, span),
                CaptureKind::Exclusive => self.borrow(id, true, span),
            };
            origins.extend(o);
        }
        origins
    }

    fn block(&mut self, b: &TypedBlock, fn_body: bool) -> Origins {
        let mark = self.scope.len();
        for stmt in &b.stmts {
            self.temps.push(Vec::new());
            match stmt {
                TypedStmt::Let(l) => {
                    let early = if matches!(l.init.kind, TypedExprKind::Lambda { .. }) {
                        let id = self.declare();
                        self.defining.push(id);
                        Some(id)
                    } else {
                        None
                    };
                    let origins = self.expr(&l.init, UseContext::Move);
                    let id = match early {
                        Some(id) => {
                            self.defining.pop();
                            id
                        }
                        None => self.declare(),
                    };
                    if !origins.is_empty() {
                        self.state.origins.insert(id, origins);
                    }
                }
                TypedStmt::Expr(e) => {
                    self.expr(e, UseContext::Move);
                }
            }
            self.temps.pop();
        }
        let mut result = match &b.tail {
            Some(t) => self.expr(t, UseContext::Move),
            None => Origins::new(),
        };

        if !fn_body {
            let inner: BTreeSet<BindingId> = self.scope[mark..].iter().copied().collect();
            self.check_scope_exit(&inner, &mut result, b.tail.as_ref().map_or(b.span, |t| t.span));
        }
        self.scope.truncate(mark);
        result
    }

    /// Loans on bindings that die at the end of a block must not outlive it.
    fn check_scope_exit(&mut self, inner: &BTreeSet<BindingId>, result: &mut Origins, tail: Span) {
        let escaping: Vec<LoanId> = result
            .iter()
            .filter_map(|o| match o {
                Origin::Loan(l) if inner.contains(&self.loans[l.0].target) => Some(*l),
                _ => None,
            })
            .collect();
        for l in escaping {
            result.remove(&Origin::Loan(l));
            let loan = self.loans[l.0].clone();
            let name = self.name(loan.target);
            self.report(
                SemanticError::new(
                    ErrorKind::LifetimeViolation,
                    loan.span,
                    format!("`{name}` does not live long enough"),
                )
                .involving(name.clone())
                .with_related(tail, format!("borrowed value escapes the block that declares `{name}`")),
            );
        }

        let at = self.cursor();
        for l in 0..self.loans.len() {
            let loan = self.loans[l].clone();
            if !inner.contains(&loan.target) {
                continue;
            }
            let holders: Vec<BindingId> = self
                .state
                .origins
                .iter()
                .filter(|(h, os)| {
                    !inner.contains(*h) && os.contains(&Origin::Loan(LoanId(l))) && self.live.used_after(**h, at)
                })
                .map(|(h, _)| *h)
                .collect();
            for h in holders {
                let name = self.name(loan.target);
                let holder = self.info(h).name.clone();
                let holder_span = self.info(h).span;
                self.report(
                    SemanticError::new(
                        ErrorKind::LifetimeViolation,
                        loan.span,
                        format!("`{name}` does not live long enough"),
                    )
                    .involving(name)
                    .involving(holder.clone())
                    .with_related(holder_span, format!("borrow later used through `{holder}`")),
                );
            }
        }
    }

    /// Checks a value leaving the function against the declared signature.
    fn check_escape(&mut self, origins: &Origins, span: Span) {
        for o in origins {
            match o {
                Origin::Loan(l) => {
                    let loan = self.loans[l.0].clone();
                    let name = self.name(loan.target);
                    let what = if loan.target.0 < self.func.params.len() {
                        "function parameter"
                    } else {
                        "local variable"
                    };
                    self.report(
                        SemanticError::new(
                            ErrorKind::LifetimeViolation,
                            span,
                            format!("cannot return reference to {what} `{name}`"),
                        )
                        .involving(name.clone())
                        .with_related(loan.span, format!("`{name}` is borrowed here")),
                    );
                }
                Origin::Param {
                    binding,
                    lifetime: Some(lt),
                } => {
                    let Some(expected) = self.ret_lifetime.clone() else {
                        continue;
                    };
                    if *lt == expected || lt == "static" {
                        continue;
                    }
                    let name = self.name(*binding);
                    let param_span = self.info(*binding).span;
                    self.report(
                        SemanticError::new(
                            ErrorKind::LifetimeViolation,
                            span,
                            format!(
                                "lifetime mismatch: returning data from `{name}` with lifetime `'{lt}` but the signature promises `'{expected}`"
                            ),
                        )
                        .involving(name)
                        .involving(format!("'{lt}"))
                        .involving(format!("'{expected}"))
                        .with_related(param_span, format!("parameter declared with lifetime `'{lt}`")),
                    );
                }
                Origin::Param { lifetime: None, .. } => {}
            }
        }
    }
}

fn tail_span(body: &TypedExpr) -> Span {
    match &body.kind {
        TypedExprKind::Block(b) => match &b.tail {
            Some(t) => t.span,
            None => b.span,
        },
        _ => body.span,
    }
}

#![forbid(unsafe_code)]

//! The typed AST handed downstream: same shape as the input, with a resolved
//! type on every expression and pattern.

use grok_ast::{BinOp, Literal, Span, UnaryOp};
use serde::Serialize;

use crate::ownership_enforcement::UseAnnotation;
use crate::subst::Substitution;
use crate::symbols::Assumption;
use crate::types::{Scheme, Type};

/// How a method receives `self`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReceiverMode {
    ByValue,
    Shared,
    Exclusive,
}

/// Where a method call lands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Dispatch {
    /// Not resolved yet; index into the collector's dispatch table.
    Pending(usize),
    Inherent { impl_index: usize },
    TraitImpl { trait_name: String, impl_index: usize },
    /// Through a declared bound on a type parameter or variable.
    Bound { trait_name: String },
    /// Through a trait object.
    Dynamic { trait_name: String },
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TypedProgram {
    pub functions: Vec<TypedFunction>,
}

impl TypedProgram {
    pub fn function(&self, name: &str) -> Option<&TypedFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TypedFunction {
    pub name: String,
    pub span: Span,
    pub scheme: Scheme,
    pub params: Vec<TypedParam>,
    pub ret: Type,
    pub body: TypedExpr,
    pub assumptions: Vec<Assumption>,
    /// Filled in by the ownership verifier.
    pub ownership: Vec<UseAnnotation>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypedParam {
    pub span: Span,
    pub name: String,
    pub mutable: bool,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypedExpr {
    pub span: Span,
    pub ty: Type,
    pub kind: TypedExprKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TypedExprKind {
    Literal(Literal),
    /// A let-bound name, parameter or pattern binding.
    Local(String),
    /// A top-level function or associated function.
    Global(String),
    Unary {
        op: UnaryOp,
        expr: Box<TypedExpr>,
    },
    Binary {
        left: Box<TypedExpr>,
        op: BinOp,
        right: Box<TypedExpr>,
    },
    Call {
        callee: Box<TypedExpr>,
        args: Vec<TypedExpr>,
    },
    MethodCall {
        receiver: Box<TypedExpr>,
        method: String,
        args: Vec<TypedExpr>,
        dispatch: Dispatch,
        mode: ReceiverMode,
    },
    Lambda {
        params: Vec<TypedParam>,
        body: Box<TypedExpr>,
    },
    Block(TypedBlock),
    If {
        cond: Box<TypedExpr>,
        then_branch: Box<TypedExpr>,
        else_branch: Option<Box<TypedExpr>>,
    },
    Match {
        scrutinee: Box<TypedExpr>,
        arms: Vec<TypedArm>,
    },
    StructLit {
        name: String,
        fields: Vec<(String, TypedExpr)>,
    },
    Variant {
        enum_name: String,
        variant: String,
        args: Vec<TypedExpr>,
    },
    Field {
        base: Box<TypedExpr>,
        field: String,
    },
    Tuple(Vec<TypedExpr>),
    Borrow {
        mutable: bool,
        expr: Box<TypedExpr>,
    },
    Deref(Box<TypedExpr>),
    Assign {
        target: Box<TypedExpr>,
        value: Box<TypedExpr>,
    },
    Return(Option<Box<TypedExpr>>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypedBlock {
    pub span: Span,
    pub stmts: Vec<TypedStmt>,
    pub tail: Option<Box<TypedExpr>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TypedStmt {
    Let(TypedLet),
    Expr(TypedExpr),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypedLet {
    pub span: Span,
    pub name: String,
    pub name_span: Span,
    pub mutable: bool,
    pub ty: Type,
    pub scheme: Scheme,
    pub init: TypedExpr,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypedArm {
    pub span: Span,
    pub pat: TypedPattern,
    pub body: TypedExpr,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypedPattern {
    pub span: Span,
    pub ty: Type,
    pub kind: PatternKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum PatternKind {
    Wildcard,
    Binding(String),
    Literal(Literal),
    Tuple(Vec<TypedPattern>),
    Variant {
        enum_name: String,
        variant: String,
        fields: Vec<TypedPattern>,
    },
    Struct {
        name: String,
        fields: Vec<(String, TypedPattern)>,
    },
}

impl TypedPattern {
    /// Names bound by the pattern with their types, left to right.
    pub fn bindings(&self) -> Vec<(String, Span, Type)> {
        let mut out = Vec::new();
        self.collect_bindings(&mut out);
        out
    }

    fn collect_bindings(&self, out: &mut Vec<(String, Span, Type)>) {
        match &self.kind {
            PatternKind::Binding(name) => out.push((name.clone(), self.span, self.ty.clone())),
            PatternKind::Wildcard | PatternKind::Literal(_) => {}
            PatternKind::Tuple(elems) | PatternKind::Variant { fields: elems, .. } => {
                elems.iter().for_each(|p| p.collect_bindings(out));
            }
            PatternKind::Struct { fields, .. } => {
                fields.iter().for_each(|(_, p)| p.collect_bindings(out));
            }
        }
    }

    fn visit_types_mut(&mut self, f: &mut dyn FnMut(&mut Type)) {
        f(&mut self.ty);
        match &mut self.kind {
            PatternKind::Wildcard | PatternKind::Binding(_) | PatternKind::Literal(_) => {}
            PatternKind::Tuple(elems) | PatternKind::Variant { fields: elems, .. } => {
                elems.iter_mut().for_each(|p| p.visit_types_mut(f));
            }
            PatternKind::Struct { fields, .. } => {
                fields.iter_mut().for_each(|(_, p)| p.visit_types_mut(f));
            }
        }
    }
}

impl TypedExpr {
    pub fn new(span: Span, ty: Type, kind: TypedExprKind) -> Self {
        Self { span, ty, kind }
    }

    /// Pre-order walk over every sub-expression.
    pub fn walk(&self, f: &mut dyn FnMut(&TypedExpr)) {
        f(self);
        match &self.kind {
            TypedExprKind::Literal(_) | TypedExprKind::Local(_) | TypedExprKind::Global(_) => {}
            TypedExprKind::Unary { expr, .. }
            | TypedExprKind::Borrow { expr, .. }
            | TypedExprKind::Deref(expr) => expr.walk(f),
            TypedExprKind::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            TypedExprKind::Call { callee, args } => {
                callee.walk(f);
                args.iter().for_each(|a| a.walk(f));
            }
            TypedExprKind::MethodCall { receiver, args, .. } => {
                receiver.walk(f);
                args.iter().for_each(|a| a.walk(f));
            }
            TypedExprKind::Lambda { body, .. } => body.walk(f),
            TypedExprKind::Block(block) => block.walk(f),
            TypedExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.walk(f);
                then_branch.walk(f);
                if let Some(e) = else_branch {
                    e.walk(f);
                }
            }
            TypedExprKind::Match { scrutinee, arms } => {
                scrutinee.walk(f);
                arms.iter().for_each(|a| a.body.walk(f));
            }
            TypedExprKind::StructLit { fields, .. } => fields.iter().for_each(|(_, e)| e.walk(f)),
            TypedExprKind::Variant { args: elems, .. } | TypedExprKind::Tuple(elems) => {
                elems.iter().for_each(|e| e.walk(f))
            }
            TypedExprKind::Field { base, .. } => base.walk(f),
            TypedExprKind::Assign { target, value } => {
                target.walk(f);
                value.walk(f);
            }
            TypedExprKind::Return(value) => {
                if let Some(v) = value {
                    v.walk(f);
                }
            }
        }
    }

    /// Visits every type stored in the tree, including lets, params and patterns.
    pub fn visit_types_mut(&mut self, f: &mut dyn FnMut(&mut Type)) {
        f(&mut self.ty);
        match &mut self.kind {
            TypedExprKind::Literal(_) | TypedExprKind::Local(_) | TypedExprKind::Global(_) => {}
            TypedExprKind::Unary { expr, .. }
            | TypedExprKind::Borrow { expr, .. }
            | TypedExprKind::Deref(expr) => expr.visit_types_mut(f),
            TypedExprKind::Binary { left, right, .. } => {
                left.visit_types_mut(f);
                right.visit_types_mut(f);
            }
            TypedExprKind::Call { callee, args } => {
                callee.visit_types_mut(f);
                args.iter_mut().for_each(|a| a.visit_types_mut(f));
            }
            TypedExprKind::MethodCall { receiver, args, .. } => {
                receiver.visit_types_mut(f);
                args.iter_mut().for_each(|a| a.visit_types_mut(f));
            }
            TypedExprKind::Lambda { params, body } => {
                params.iter_mut().for_each(|p| f(&mut p.ty));
                body.visit_types_mut(f);
            }
            TypedExprKind::Block(block) => block.visit_types_mut(f),
            TypedExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.visit_types_mut(f);
                then_branch.visit_types_mut(f);
                if let Some(e) = else_branch {
                    e.visit_types_mut(f);
                }
            }
            TypedExprKind::Match { scrutinee, arms } => {
                scrutinee.visit_types_mut(f);
                for arm in arms {
                    arm.pat.visit_types_mut(f);
                    arm.body.visit_types_mut(f);
                }
            }
            TypedExprKind::StructLit { fields, .. } => {
                fields.iter_mut().for_each(|(_, e)| e.visit_types_mut(f))
            }
            TypedExprKind::Variant { args: elems, .. } | TypedExprKind::Tuple(elems) => {
                elems.iter_mut().for_each(|e| e.visit_types_mut(f))
            }
            TypedExprKind::Field { base, .. } => base.visit_types_mut(f),
            TypedExprKind::Assign { target, value } => {
                target.visit_types_mut(f);
                value.visit_types_mut(f);
            }
            TypedExprKind::Return(value) => {
                if let Some(v) = value {
                    v.visit_types_mut(f);
                }
            }
        }
    }

    /// Replaces pending dispatch slots with their resolved targets.
    pub fn fill_dispatch(&mut self, table: &[Option<(Dispatch, ReceiverMode)>]) {
        self.walk_mut(&mut |e| {
            if let TypedExprKind::MethodCall { dispatch, mode, .. } = &mut e.kind {
                if let Dispatch::Pending(slot) = *dispatch {
                    if let Some(Some((resolved, m))) = table.get(slot) {
                        *mode = *m;
                        *dispatch = resolved.clone();
                    }
                }
            }
        });
    }

    fn walk_mut(&mut self, f: &mut dyn FnMut(&mut TypedExpr)) {
        f(self);
        match &mut self.kind {
            TypedExprKind::Literal(_) | TypedExprKind::Local(_) | TypedExprKind::Global(_) => {}
            TypedExprKind::Unary { expr, .. }
            | TypedExprKind::Borrow { expr, .. }
            | TypedExprKind::Deref(expr) => expr.walk_mut(f),
            TypedExprKind::Binary { left, right, .. } => {
                left.walk_mut(f);
                right.walk_mut(f);
            }
            TypedExprKind::Call { callee, args } => {
                callee.walk_mut(f);
                args.iter_mut().for_each(|a| a.walk_mut(f));
            }
            TypedExprKind::MethodCall { receiver, args, .. } => {
                receiver.walk_mut(f);
                args.iter_mut().for_each(|a| a.walk_mut(f));
            }
            TypedExprKind::Lambda { body, .. } => body.walk_mut(f),
            TypedExprKind::Block(block) => {
                for stmt in &mut block.stmts {
                    match stmt {
                        TypedStmt::Let(l) => l.init.walk_mut(f),
                        TypedStmt::Expr(e) => e.walk_mut(f),
                    }
                }
                if let Some(t) = &mut block.tail {
                    t.walk_mut(f);
                }
            }
            TypedExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.walk_mut(f);
                then_branch.walk_mut(f);
                if let Some(e) = else_branch {
                    e.walk_mut(f);
                }
            }
            TypedExprKind::Match { scrutinee, arms } => {
                scrutinee.walk_mut(f);
                arms.iter_mut().for_each(|a| a.body.walk_mut(f));
            }
            TypedExprKind::StructLit { fields, .. } => {
                fields.iter_mut().for_each(|(_, e)| e.walk_mut(f))
            }
            TypedExprKind::Variant { args: elems, .. } | TypedExprKind::Tuple(elems) => {
                elems.iter_mut().for_each(|e| e.walk_mut(f))
            }
            TypedExprKind::Field { base, .. } => base.walk_mut(f),
            TypedExprKind::Assign { target, value } => {
                target.walk_mut(f);
                value.walk_mut(f);
            }
            TypedExprKind::Return(value) => {
                if let Some(v) = value {
                    v.walk_mut(f);
                }
            }
        }
    }

    /// Applies the final substitution to every type in the tree.
    pub fn zonk(&mut self, subst: &Substitution) {
        self.visit_types_mut(&mut |t| *t = subst.apply(t));
    }

    /// True when evaluation never falls through (ends in `return`).
    pub fn diverges(&self) -> bool {
        match &self.kind {
            TypedExprKind::Return(_) => true,
            TypedExprKind::Block(b) => b.diverges(),
            TypedExprKind::If {
                then_branch,
                else_branch: Some(e),
                ..
            } => then_branch.diverges() && e.diverges(),
            _ => false,
        }
    }
}

impl TypedBlock {
    pub fn walk(&self, f: &mut dyn FnMut(&TypedExpr)) {
        for stmt in &self.stmts {
            match stmt {
                TypedStmt::Let(l) => l.init.walk(f),
                TypedStmt::Expr(e) => e.walk(f),
            }
        }
        if let Some(t) = &self.tail {
            t.walk(f);
        }
    }

    fn visit_types_mut(&mut self, f: &mut dyn FnMut(&mut Type)) {
        for stmt in &mut self.stmts {
            match stmt {
                TypedStmt::Let(l) => {
                    f(&mut l.ty);
                    l.init.visit_types_mut(f);
                }
                TypedStmt::Expr(e) => e.visit_types_mut(f),
            }
        }
        if let Some(t) = &mut self.tail {
            t.visit_types_mut(f);
        }
    }

    pub fn diverges(&self) -> bool {
        match &self.tail {
            Some(t) => t.diverges(),
            None => self.stmts.iter().any(|s| match s {
                TypedStmt::Expr(e) => e.diverges(),
                TypedStmt::Let(l) => l.init.diverges(),
            }),
        }
    }
}

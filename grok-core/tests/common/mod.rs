//! AST builders shared by the integration tests. Every node gets a fresh
//! span so diagnostics can be told apart; `at` pins one where a test
//! asserts on it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};

use grok_ast::{
    BinOp, Block, EnumDef, Expr, ExprKind, FieldDef, FnDef, Ident, ImplDef, Item, LetStmt,
    Literal, MatchArm, Param, Pattern, Program, Span, Stmt, StructDef, TraitDef, TraitMethod,
    TypeParam, TypeRef, VariantDef, ident, span,
};
use grok_core::{CheckOutcome, Checker, CheckerConfig, ErrorKind, SemanticError};

static NEXT_LINE: AtomicU32 = AtomicU32::new(1000);

pub fn sp() -> Span {
    span(NEXT_LINE.fetch_add(1, Ordering::Relaxed), 1)
}

fn id(name: &str) -> Ident {
    ident(sp(), name)
}

// Expressions

pub fn int(v: i64) -> Expr {
    Expr::new(sp(), ExprKind::Literal(Literal::Int(v)))
}

pub fn string(s: &str) -> Expr {
    Expr::new(sp(), ExprKind::Literal(Literal::Str(s.to_string())))
}

pub fn boolean(b: bool) -> Expr {
    Expr::new(sp(), ExprKind::Literal(Literal::Bool(b)))
}

pub fn unit() -> Expr {
    Expr::new(sp(), ExprKind::Literal(Literal::Unit))
}

pub fn var(name: &str) -> Expr {
    let s = sp();
    Expr::new(s, ExprKind::Ident(ident(s, name)))
}

/// Pins the span of `e`.
pub fn at(line: u32, col: u32, mut e: Expr) -> Expr {
    e.span = span(line, col);
    if let ExprKind::Ident(i) = &mut e.kind {
        i.span = e.span;
    }
    e
}

pub fn call(f: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Call {
            callee: Box::new(var(f)),
            args,
        },
    )
}

pub fn call_expr(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Call {
            callee: Box::new(callee),
            args,
        },
    )
}

pub fn method(receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::MethodCall {
            receiver: Box::new(receiver),
            method: id(name),
            args,
        },
    )
}

pub fn lambda(params: &[&str], body: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Lambda {
            params: params.iter().map(|p| untyped(p)).collect(),
            body: Box::new(body),
        },
    )
}

pub fn block(stmts: Vec<Stmt>, tail: Option<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Block(Block {
            span: sp(),
            stmts,
            tail: tail.map(Box::new),
        }),
    )
}

pub fn if_(cond: Expr, then_branch: Expr, else_branch: Option<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        },
    )
}

pub fn match_(scrutinee: Expr, arms: Vec<(Pattern, Expr)>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Match {
            scrutinee: Box::new(scrutinee),
            arms: arms
                .into_iter()
                .map(|(pat, body)| MatchArm {
                    span: sp(),
                    pat,
                    body,
                })
                .collect(),
        },
    )
}

pub fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    )
}

pub fn tuple(elems: Vec<Expr>) -> Expr {
    Expr::new(sp(), ExprKind::Tuple(elems))
}

pub fn struct_lit(name: &str, fields: Vec<(&str, Expr)>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::StructLit {
            name: id(name),
            fields: fields.into_iter().map(|(f, e)| (id(f), e)).collect(),
        },
    )
}

pub fn variant(enum_name: &str, v: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Variant {
            enum_name: id(enum_name),
            variant: id(v),
            args,
        },
    )
}

pub fn field(base: Expr, name: &str) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Field {
            base: Box::new(base),
            field: id(name),
        },
    )
}

pub fn borrow(e: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Borrow {
            mutable: false,
            expr: Box::new(e),
        },
    )
}

pub fn borrow_mut(e: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Borrow {
            mutable: true,
            expr: Box::new(e),
        },
    )
}

pub fn deref(e: Expr) -> Expr {
    Expr::new(sp(), ExprKind::Deref(Box::new(e)))
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    Expr::new(
        sp(),
        ExprKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        },
    )
}

pub fn ret(value: Option<Expr>) -> Expr {
    Expr::new(sp(), ExprKind::Return(value.map(Box::new)))
}

// Statements

pub fn let_(name: &str, init: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        span: sp(),
        name: id(name),
        mutable: false,
        ty: None,
        init,
    })
}

pub fn let_mut(name: &str, init: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        span: sp(),
        name: id(name),
        mutable: true,
        ty: None,
        init,
    })
}

pub fn let_typed(name: &str, ty: TypeRef, init: Expr) -> Stmt {
    Stmt::Let(LetStmt {
        span: sp(),
        name: id(name),
        mutable: false,
        ty: Some(ty),
        init,
    })
}

pub fn expr_stmt(e: Expr) -> Stmt {
    Stmt::Expr(e)
}

// Patterns

pub fn p_wild() -> Pattern {
    Pattern::Wildcard { span: sp() }
}

pub fn p_bind(name: &str) -> Pattern {
    Pattern::Binding(id(name))
}

pub fn p_bool(b: bool) -> Pattern {
    Pattern::Literal {
        span: sp(),
        value: Literal::Bool(b),
    }
}

pub fn p_int(v: i64) -> Pattern {
    Pattern::Literal {
        span: sp(),
        value: Literal::Int(v),
    }
}

pub fn p_tuple(elems: Vec<Pattern>) -> Pattern {
    Pattern::Tuple { span: sp(), elems }
}

pub fn p_variant(enum_name: &str, v: &str, fields: Vec<Pattern>) -> Pattern {
    Pattern::Variant {
        span: sp(),
        enum_name: id(enum_name),
        variant: id(v),
        fields,
    }
}

// Types

pub fn ty(name: &str) -> TypeRef {
    TypeRef::named(sp(), name)
}

pub fn ty_args(name: &str, args: Vec<TypeRef>) -> TypeRef {
    TypeRef::Named {
        span: sp(),
        name: id(name),
        args,
    }
}

pub fn ref_ty(mutable: bool, lifetime: Option<&str>, pointee: TypeRef) -> TypeRef {
    TypeRef::Reference {
        span: sp(),
        mutable,
        lifetime: lifetime.map(id),
        pointee: Box::new(pointee),
    }
}

pub fn fn_ty(params: Vec<TypeRef>, ret: TypeRef) -> TypeRef {
    TypeRef::Function {
        span: sp(),
        params,
        ret: Box::new(ret),
    }
}

pub fn unit_ty() -> TypeRef {
    TypeRef::Tuple {
        span: sp(),
        elems: Vec::new(),
    }
}

// Parameters

pub fn typed(name: &str, t: TypeRef) -> Param {
    Param {
        span: sp(),
        name: id(name),
        mutable: false,
        ty: Some(t),
    }
}

pub fn untyped(name: &str) -> Param {
    Param {
        span: sp(),
        name: id(name),
        mutable: false,
        ty: None,
    }
}

pub fn self_param() -> Param {
    untyped("self")
}

/// `self: &Self` or `self: &mut Self`.
pub fn self_ref(mutable: bool) -> Param {
    Param {
        ty: Some(ref_ty(mutable, None, ty("Self"))),
        ..self_param()
    }
}

pub fn type_param(name: &str, bounds: &[&str]) -> TypeParam {
    TypeParam {
        span: sp(),
        name: id(name),
        bounds: bounds.iter().map(|b| id(b)).collect(),
    }
}

// Items

pub fn fn_def(name: &str, params: Vec<Param>, ret: Option<TypeRef>, body: Expr) -> FnDef {
    FnDef {
        span: sp(),
        name: id(name),
        type_params: Vec::new(),
        lifetimes: Vec::new(),
        params,
        ret,
        body,
    }
}

pub fn func(name: &str, params: Vec<Param>, ret: Option<TypeRef>, body: Expr) -> Item {
    Item::Function(fn_def(name, params, ret, body))
}

pub fn generic_func(
    name: &str,
    type_params: Vec<TypeParam>,
    params: Vec<Param>,
    ret: Option<TypeRef>,
    body: Expr,
) -> Item {
    Item::Function(FnDef {
        type_params,
        ..fn_def(name, params, ret, body)
    })
}

pub fn lifetime_func(
    name: &str,
    lifetimes: &[&str],
    params: Vec<Param>,
    ret: Option<TypeRef>,
    body: Expr,
) -> Item {
    Item::Function(FnDef {
        lifetimes: lifetimes.iter().map(|l| id(l)).collect(),
        ..fn_def(name, params, ret, body)
    })
}

pub fn struct_def(name: &str, type_params: &[&str], fields: Vec<(&str, TypeRef)>) -> Item {
    Item::Struct(StructDef {
        span: sp(),
        name: id(name),
        type_params: type_params.iter().map(|p| type_param(p, &[])).collect(),
        fields: fields
            .into_iter()
            .map(|(n, t)| FieldDef {
                span: sp(),
                name: id(n),
                ty: t,
            })
            .collect(),
    })
}

pub fn enum_def(name: &str, type_params: &[&str], variants: Vec<(&str, Vec<TypeRef>)>) -> Item {
    Item::Enum(EnumDef {
        span: sp(),
        name: id(name),
        type_params: type_params.iter().map(|p| type_param(p, &[])).collect(),
        variants: variants
            .into_iter()
            .map(|(n, fields)| VariantDef {
                span: sp(),
                name: id(n),
                fields,
            })
            .collect(),
    })
}

pub fn trait_def(name: &str, methods: Vec<(&str, Vec<Param>, Option<TypeRef>)>) -> Item {
    Item::Trait(TraitDef {
        span: sp(),
        name: id(name),
        methods: methods
            .into_iter()
            .map(|(n, params, ret)| TraitMethod {
                span: sp(),
                name: id(n),
                params,
                ret,
            })
            .collect(),
    })
}

pub fn impl_def(
    type_params: Vec<TypeParam>,
    trait_name: Option<&str>,
    self_ty: TypeRef,
    methods: Vec<FnDef>,
) -> Item {
    Item::Impl(ImplDef {
        span: sp(),
        type_params,
        trait_name: trait_name.map(id),
        self_ty,
        methods,
    })
}

/// `Option<T>` with `Some(T)` and `None`.
pub fn option_enum() -> Item {
    enum_def("Option", &["T"], vec![("Some", vec![ty("T")]), ("None", Vec::new())])
}

/// A struct without a `Copy` impl: uses by value move it.
pub fn token_struct() -> Item {
    struct_def("Token", &[], vec![("id", ty("i32"))])
}

/// `fn consume(t: Token) -> () {}`
pub fn consume_fn() -> Item {
    func(
        "consume",
        vec![typed("t", ty("Token"))],
        Some(unit_ty()),
        block(Vec::new(), None),
    )
}

pub fn program(items: Vec<Item>) -> Program {
    Program { items }
}

/// `fn main() -> () { stmts }`
pub fn main_fn(stmts: Vec<Stmt>) -> Item {
    func("main", Vec::new(), Some(unit_ty()), block(stmts, None))
}

// Running

pub fn check(p: &Program) -> CheckOutcome {
    Checker::new().check_program(p).expect("no internal checker error")
}

pub fn check_with(config: CheckerConfig, p: &Program) -> CheckOutcome {
    Checker::with_config(config)
        .check_program(p)
        .expect("no internal checker error")
}

pub fn kinds(outcome: &CheckOutcome) -> Vec<ErrorKind> {
    outcome.diagnostics.iter().map(|d| d.kind).collect()
}

pub fn only_error(outcome: &CheckOutcome) -> &SemanticError {
    assert_eq!(
        outcome.diagnostics.len(),
        1,
        "expected exactly one diagnostic, got {:#?}",
        outcome.diagnostics
    );
    &outcome.diagnostics[0]
}

pub fn assert_clean(outcome: &CheckOutcome) {
    assert!(
        outcome.diagnostics.is_empty(),
        "unexpected diagnostics: {:#?}",
        outcome.diagnostics
    );
}

pub fn scheme_of(outcome: &CheckOutcome, name: &str) -> String {
    outcome
        .program
        .function(name)
        .unwrap_or_else(|| panic!("`{name}` was not accepted: {:#?}", outcome.diagnostics))
        .scheme
        .to_string()
}

#![forbid(unsafe_code)]

mod common;

use common::*;
use grok_ast::{BinOp, span};
use grok_core::typed::{TypedExprKind, TypedStmt};
use grok_core::{CheckerConfig, ErrorKind, IntLiteralMode, Type};

#[test]
fn unannotated_identity_is_generalized() {
    let p = program(vec![
        func("id", vec![untyped("x")], None, var("x")),
        main_fn(vec![
            let_("a", call("id", vec![int(1)])),
            let_("b", call("id", vec![boolean(true)])),
        ]),
    ]);
    let out = check(&p);
    assert_clean(&out);

    let id = out.program.function("id").expect("id accepted");
    assert_eq!(id.scheme.vars.len(), 1);
    let Type::Function(params, ret) = &id.scheme.ty else {
        panic!("expected a function type, got {}", id.scheme.ty);
    };
    assert_eq!(params.len(), 1);
    assert_eq!(&params[0], ret.as_ref());
    assert!(matches!(params[0], Type::Variable(_)));
}

#[test]
fn let_bound_lambda_is_polymorphic() {
    let p = program(vec![main_fn(vec![
        let_("same", lambda(&["y"], var("y"))),
        let_("a", call("same", vec![int(1)])),
        let_("b", call("same", vec![string("s")])),
    ])]);
    let out = check(&p);
    assert_clean(&out);

    let main = out.program.function("main").expect("main accepted");
    let TypedExprKind::Block(body) = &main.body.kind else {
        panic!("main body is a block");
    };
    let lets: Vec<_> = body
        .stmts
        .iter()
        .filter_map(|s| match s {
            TypedStmt::Let(l) => Some(l),
            TypedStmt::Expr(_) => None,
        })
        .collect();
    assert_eq!(lets[0].scheme.vars.len(), 1);
    assert_eq!(lets[1].ty, Type::i32());
    assert_eq!(lets[2].ty, Type::prim("str"));
}

#[test]
fn lambda_parameters_are_monomorphic() {
    // `g` is a lambda parameter, so both uses must agree.
    let apply_twice = lambda(
        &["g"],
        tuple(vec![
            call("g", vec![int(1)]),
            call("g", vec![at(40, 7, boolean(true))]),
        ]),
    );
    let p = program(vec![main_fn(vec![let_("h", apply_twice)])]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert_eq!(err.span, span(40, 7));
    assert_eq!(err.item.as_deref(), Some("main"));
}

#[test]
fn self_application_fails_the_occurs_check() {
    let p = program(vec![main_fn(vec![let_(
        "f",
        lambda(&["x"], call("x", vec![var("x")])),
    )])]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::OccursCheckFailure);
    assert!(err.message.contains("infinite type"), "{}", err.message);
}

#[test]
fn unknown_names_are_unbound() {
    let p = program(vec![func(
        "main",
        Vec::new(),
        Some(ty("i32")),
        at(12, 3, var("missing")),
    )]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::UnboundName);
    assert_eq!(err.span, span(12, 3));
    assert!(err.message.contains("`missing`"));
}

#[test]
fn branches_must_agree() {
    let body = if_(var("flag"), int(1), Some(at(20, 9, boolean(false))));
    let p = program(vec![func(
        "pick",
        vec![typed("flag", ty("bool"))],
        Some(ty("i32")),
        body,
    )]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert_eq!(err.span, span(20, 9));
    assert!(err.involved.iter().any(|t| t == "i32"));
    assert!(err.involved.iter().any(|t| t == "bool"));
}

#[test]
fn integer_types_never_widen() {
    let p = program(vec![func(
        "widen",
        vec![typed("x", ty("i32"))],
        Some(ty("i64")),
        var("x"),
    )]);
    let out = check(&p);
    assert_eq!(kinds(&out), vec![ErrorKind::TypeMismatch]);
}

#[test]
fn comparisons_yield_bool() {
    let p = program(vec![func(
        "less",
        vec![untyped("a"), untyped("b")],
        None,
        binary(var("a"), BinOp::Lt, binary(var("b"), BinOp::Add, int(1))),
    )]);
    let out = check(&p);
    assert_clean(&out);
    assert_eq!(scheme_of(&out, "less"), "(i32, i32) -> bool");
}

#[test]
fn mutually_recursive_functions_share_one_group() {
    // even(n) = if n == 0 { true } else { odd(n - 1) }, and odd likewise.
    let even = func(
        "even",
        vec![untyped("n")],
        None,
        if_(
            binary(var("n"), BinOp::Eq, int(0)),
            boolean(true),
            Some(call("odd", vec![binary(var("n"), BinOp::Sub, int(1))])),
        ),
    );
    let odd = func(
        "odd",
        vec![untyped("n")],
        None,
        if_(
            binary(var("n"), BinOp::Eq, int(0)),
            boolean(false),
            Some(call("even", vec![binary(var("n"), BinOp::Sub, int(1))])),
        ),
    );
    let out = check(&program(vec![even, odd]));
    assert_clean(&out);
    assert_eq!(scheme_of(&out, "even"), "i32 -> bool");
    assert_eq!(scheme_of(&out, "odd"), "i32 -> bool");
}

#[test]
fn annotated_generic_parameters_are_rigid() {
    // fn bad<T>(x: T) -> i32 { x }
    let p = program(vec![generic_func(
        "bad",
        vec![type_param("T", &[])],
        vec![typed("x", ty("T"))],
        Some(ty("i32")),
        var("x"),
    )]);
    let out = check(&p);
    assert_eq!(kinds(&out), vec![ErrorKind::TypeMismatch]);
}

#[test]
fn field_access_needs_a_known_type() {
    let p = program(vec![func(
        "get",
        vec![untyped("p")],
        None,
        field(var("p"), "x"),
    )]);
    let out = check(&p);
    assert_eq!(kinds(&out), vec![ErrorKind::AnnotationRequired]);
}

#[test]
fn generic_enums_instantiate_per_use() {
    let p = program(vec![
        option_enum(),
        main_fn(vec![
            let_("a", variant("Option", "Some", vec![int(1)])),
            let_("b", variant("Option", "Some", vec![boolean(true)])),
            let_("c", variant("Option", "None", Vec::new())),
        ]),
    ]);
    let out = check(&p);
    assert_clean(&out);
}

#[test]
fn require_annotation_mode_rejects_unresolved_literals() {
    let cfg = CheckerConfig::default().with_int_literals(IntLiteralMode::RequireAnnotation);
    let p = program(vec![main_fn(vec![let_("n", at(8, 13, int(7)))])]);
    let out = check_with(cfg, &p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::AnnotationRequired);
    assert_eq!(err.span, span(8, 13));
    assert!(err.message.contains("integer literal"));
}

#[test]
fn require_annotation_mode_takes_width_from_context() {
    let cfg = CheckerConfig::default().with_int_literals(IntLiteralMode::RequireAnnotation);
    let p = program(vec![
        main_fn(vec![let_typed("n", ty("i64"), int(7))]),
        func("byte", Vec::new(), Some(ty("u8")), int(255)),
    ]);
    let out = check_with(cfg, &p);
    assert_clean(&out);
}

#[test]
fn annotated_lets_constrain_their_initializer() {
    let p = program(vec![main_fn(vec![let_typed(
        "s",
        ty("str"),
        at(9, 2, int(1)),
    )])]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert_eq!(err.span, span(9, 2));
}

#[test]
fn let_bindings_waiting_on_a_method_stay_monomorphic() {
    let foo = struct_def("Foo", &[], vec![("v", ty("i32"))]);
    let get = impl_def(
        Vec::new(),
        None,
        ty("Foo"),
        vec![fn_def("get", vec![self_ref(false)], Some(ty("i32")), int(1))],
    );
    // `fn f(x) { let y = x.get(); let z: &Foo = &x; y }`
    let f = func(
        "f",
        vec![untyped("x")],
        None,
        block(
            vec![
                let_("y", method(var("x"), "get", Vec::new())),
                let_typed("z", ref_ty(false, None, ty("Foo")), borrow(var("x"))),
            ],
            Some(var("y")),
        ),
    );
    let p = program(vec![
        foo,
        get,
        f,
        main_fn(vec![let_typed(
            "s",
            ty("str"),
            call("f", vec![struct_lit("Foo", vec![("v", int(1))])]),
        )]),
    ]);
    let out = check(&p);
    assert_eq!(scheme_of(&out, "f"), "Foo -> i32");
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert_eq!(err.item.as_deref(), Some("main"));
}

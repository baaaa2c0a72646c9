#![forbid(unsafe_code)]

mod common;

use common::*;
use grok_ast::{BinOp, Program, span};
use grok_core::{CheckerConfig, ErrorKind};

/// A mix of independent, dependent and failing items.
fn mixed_program() -> Program {
    program(vec![
        token_struct(),
        consume_fn(),
        func("id", vec![untyped("x")], None, var("x")),
        func(
            "twice",
            vec![untyped("f"), untyped("x")],
            None,
            call("f", vec![call("f", vec![var("x")])]),
        ),
        func(
            "inc",
            vec![untyped("n")],
            None,
            binary(var("n"), BinOp::Add, int(1)),
        ),
        func(
            "apply_inc",
            Vec::new(),
            None,
            call("twice", vec![var("inc"), call("id", vec![int(3)])]),
        ),
        func("broken", Vec::new(), None, var("nowhere")),
        func("uses_broken", Vec::new(), None, call("broken", Vec::new())),
        main_fn(vec![
            let_("t", token()),
            expr_stmt(call("consume", vec![var("t")])),
            expr_stmt(call("consume", vec![var("t")])),
        ]),
    ])
}

fn token() -> grok_ast::Expr {
    struct_lit("Token", vec![("id", int(1))])
}

#[test]
fn schemes_flow_between_dependent_items() {
    let out = check(&mixed_program());
    assert_eq!(scheme_of(&out, "inc"), "i32 -> i32");
    assert_eq!(scheme_of(&out, "apply_inc"), "() -> i32");
    let twice = &out.program.function("twice").expect("twice").scheme;
    assert_eq!(twice.vars.len(), 1);
}

#[test]
fn dependents_of_failed_items_are_withheld() {
    let out = check(&mixed_program());
    let unbound: Vec<_> = out
        .diagnostics
        .iter()
        .filter(|d| d.kind == ErrorKind::UnboundName)
        .collect();
    assert_eq!(unbound.len(), 1, "only the root cause is reported");
    assert_eq!(unbound[0].item.as_deref(), Some("broken"));
    assert!(out.program.function("broken").is_none());
    assert!(out.program.function("uses_broken").is_none());
}

#[test]
fn annotated_failures_do_not_block_callers() {
    let p = program(vec![
        func("broken", Vec::new(), Some(ty("i32")), var("nowhere")),
        func("caller", Vec::new(), Some(ty("i32")), call("broken", Vec::new())),
    ]);
    let out = check(&p);
    assert_eq!(kinds(&out), vec![ErrorKind::UnboundName]);
    assert!(out.program.function("caller").is_some());
}

#[test]
fn a_failing_member_withholds_its_whole_group() {
    let ping = func(
        "ping",
        vec![untyped("n")],
        None,
        if_(
            binary(var("n"), BinOp::Eq, int(0)),
            int(0),
            Some(call("pong", vec![binary(var("n"), BinOp::Sub, int(1))])),
        ),
    );
    let pong = func(
        "pong",
        vec![untyped("n")],
        None,
        if_(
            binary(var("n"), BinOp::Eq, int(0)),
            at(77, 5, boolean(true)),
            Some(call("ping", vec![var("n")])),
        ),
    );
    let out = check(&program(vec![ping, pong]));
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert!(out.program.functions.is_empty());
}

#[test]
fn diagnostics_follow_item_order_then_position() {
    let p = program(vec![
        func(
            "second_error_first_item",
            Vec::new(),
            Some(ty("i32")),
            at(90, 1, boolean(true)),
        ),
        func(
            "first_error_second_item",
            Vec::new(),
            Some(ty("i32")),
            at(10, 1, var("undefined")),
        ),
    ]);
    let out = check(&p);
    let items: Vec<_> = out
        .diagnostics
        .iter()
        .map(|d| (d.item.as_deref(), d.span))
        .collect();
    assert_eq!(
        items,
        vec![
            (Some("second_error_first_item"), span(90, 1)),
            (Some("first_error_second_item"), span(10, 1)),
        ]
    );
}

#[test]
fn duplicate_functions_point_at_the_first_definition() {
    let first = fn_def("dup", Vec::new(), Some(ty("i32")), int(1));
    let first_span = first.name.span;
    let p = program(vec![
        grok_ast::Item::Function(first),
        func("dup", Vec::new(), Some(ty("i32")), int(2)),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::DuplicateDefinition);
    assert_eq!(err.related[0].span, first_span);
    assert_eq!(out.program.functions.len(), 1);
}

#[test]
fn serial_and_parallel_runs_agree() {
    let p = mixed_program();
    let parallel = check_with(CheckerConfig::default(), &p);
    let serial = check_with(CheckerConfig::default().serial(), &p);

    assert_eq!(parallel.diagnostics, serial.diagnostics);
    let summary = |o: &grok_core::CheckOutcome| {
        o.program
            .functions
            .iter()
            .map(|f| (f.name.clone(), f.scheme.to_string()))
            .collect::<Vec<_>>()
    };
    assert_eq!(summary(&parallel), summary(&serial));
}

#[test]
fn accepted_items_keep_source_order() {
    let out = check(&mixed_program());
    let names: Vec<_> = out.program.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["consume", "id", "twice", "inc", "apply_inc"]);
    let main_errors: Vec<_> = out
        .diagnostics
        .iter()
        .filter(|d| d.item.as_deref() == Some("main"))
        .map(|d| d.kind)
        .collect();
    assert_eq!(main_errors, vec![ErrorKind::UseAfterMove]);
}

#[test]
fn empty_programs_check_cleanly() {
    let out = check(&program(Vec::new()));
    assert!(out.is_ok());
    assert!(out.program.functions.is_empty());
}

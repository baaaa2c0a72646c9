#![forbid(unsafe_code)]

mod common;

use common::*;
use grok_ast::{BinOp, Item, span};
use grok_core::{Access, ErrorKind, OwnershipFact};

/// `fn read(r: &i32) -> () {}`
fn read_fn() -> Item {
    func(
        "read",
        vec![typed("r", ref_ty(false, None, ty("i32")))],
        Some(unit_ty()),
        block(Vec::new(), None),
    )
}

/// `fn use_mut(r: &mut i32) -> () {}`
fn use_mut_fn() -> Item {
    func(
        "use_mut",
        vec![typed("r", ref_ty(true, None, ty("i32")))],
        Some(unit_ty()),
        block(Vec::new(), None),
    )
}

/// `fn peek(t: &Token) -> () {}`
fn peek_fn() -> Item {
    func(
        "peek",
        vec![typed("t", ref_ty(false, None, ty("Token")))],
        Some(unit_ty()),
        block(Vec::new(), None),
    )
}

fn token() -> grok_ast::Expr {
    struct_lit("Token", vec![("id", int(1))])
}

#[test]
fn two_live_mutable_borrows_conflict() {
    let second = at(30, 14, borrow_mut(var("x")));
    let p = program(vec![
        use_mut_fn(),
        main_fn(vec![
            let_mut("x", int(1)),
            let_("r1", borrow_mut(var("x"))),
            let_("r2", second),
            expr_stmt(call("use_mut", vec![var("r1")])),
            expr_stmt(call("use_mut", vec![var("r2")])),
        ]),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::ConflictingBorrow);
    assert_eq!(err.span, span(30, 14));
    assert_eq!(
        err.message,
        "cannot borrow `x` as mutable more than once at a time"
    );
    assert_eq!(err.related.len(), 1);
    assert!(out.program.function("main").is_none());
}

#[test]
fn borrows_end_at_their_last_use() {
    let p = program(vec![
        use_mut_fn(),
        main_fn(vec![
            let_mut("x", int(1)),
            let_("r1", borrow_mut(var("x"))),
            expr_stmt(call("use_mut", vec![var("r1")])),
            let_("r2", borrow_mut(var("x"))),
            expr_stmt(call("use_mut", vec![var("r2")])),
        ]),
    ]);
    assert_clean(&check(&p));
}

#[test]
fn mutable_borrow_conflicts_with_live_shared_borrow() {
    let p = program(vec![
        read_fn(),
        main_fn(vec![
            let_mut("x", int(1)),
            let_("r", borrow(var("x"))),
            let_("m", borrow_mut(var("x"))),
            expr_stmt(call("read", vec![var("r")])),
        ]),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::ConflictingBorrow);
    assert!(err.message.contains("also borrowed as immutable"), "{}", err.message);
}

#[test]
fn shared_borrows_coexist() {
    let p = program(vec![
        read_fn(),
        main_fn(vec![
            let_("x", int(1)),
            let_("a", borrow(var("x"))),
            let_("b", borrow(var("x"))),
            expr_stmt(call("read", vec![var("a")])),
            expr_stmt(call("read", vec![var("b")])),
        ]),
    ]);
    assert_clean(&check(&p));
}

#[test]
fn use_after_move_is_reported_at_the_second_use() {
    let p = program(vec![
        token_struct(),
        consume_fn(),
        main_fn(vec![
            let_("t", token()),
            expr_stmt(call("consume", vec![var("t")])),
            expr_stmt(call("consume", vec![at(51, 17, var("t"))])),
        ]),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::UseAfterMove);
    assert_eq!(err.span, span(51, 17));
    assert_eq!(err.message, "use of moved value: `t`");
    assert_eq!(err.related[0].message, "value moved here");
}

#[test]
fn copy_types_are_not_moved() {
    let point = struct_def("Point", &[], vec![("x", ty("i32"))]);
    let copy_impl = impl_def(Vec::new(), Some("Copy"), ty("Point"), Vec::new());
    let take = func(
        "take",
        vec![typed("p", ty("Point"))],
        Some(unit_ty()),
        block(Vec::new(), None),
    );
    let p = program(vec![
        point,
        copy_impl,
        take,
        main_fn(vec![
            let_("p", struct_lit("Point", vec![("x", int(0))])),
            expr_stmt(call("take", vec![var("p")])),
            expr_stmt(call("take", vec![var("p")])),
            let_("n", int(3)),
            let_("m", var("n")),
            let_("k", var("n")),
        ]),
    ]);
    assert_clean(&check(&p));
}

#[test]
fn move_in_one_branch_is_a_possible_move() {
    let p = program(vec![
        token_struct(),
        consume_fn(),
        func(
            "maybe_consume",
            vec![typed("flag", ty("bool"))],
            Some(unit_ty()),
            block(
                vec![
                    let_("t", token()),
                    expr_stmt(if_(
                        var("flag"),
                        block(vec![expr_stmt(call("consume", vec![var("t")]))], None),
                        None,
                    )),
                    expr_stmt(call("consume", vec![var("t")])),
                ],
                None,
            ),
        ),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::UseAfterMove);
    assert_eq!(err.message, "use of possibly moved value: `t`");
    assert_eq!(err.item.as_deref(), Some("maybe_consume"));
}

#[test]
fn moves_on_both_branches_are_definite() {
    let moving_branch = || block(vec![expr_stmt(call("consume", vec![var("t")]))], None);
    let p = program(vec![
        token_struct(),
        consume_fn(),
        func(
            "always_consume",
            vec![typed("flag", ty("bool"))],
            Some(unit_ty()),
            block(
                vec![
                    let_("t", token()),
                    expr_stmt(if_(var("flag"), moving_branch(), Some(moving_branch()))),
                    expr_stmt(call("consume", vec![var("t")])),
                ],
                None,
            ),
        ),
    ]);
    let out = check(&p);
    assert_eq!(only_error(&out).message, "use of moved value: `t`");
}

#[test]
fn cannot_move_out_while_borrowed() {
    let p = program(vec![
        token_struct(),
        consume_fn(),
        peek_fn(),
        main_fn(vec![
            let_("t", token()),
            let_("r", borrow(var("t"))),
            expr_stmt(call("consume", vec![var("t")])),
            expr_stmt(call("peek", vec![var("r")])),
        ]),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::ConflictingBorrow);
    assert_eq!(err.message, "cannot move out of `t` because it is borrowed");
}

#[test]
fn cannot_assign_while_borrowed() {
    let p = program(vec![
        read_fn(),
        main_fn(vec![
            let_mut("x", int(1)),
            let_("r", borrow(var("x"))),
            expr_stmt(assign(var("x"), int(2))),
            expr_stmt(call("read", vec![var("r")])),
        ]),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::ConflictingBorrow);
    assert_eq!(err.message, "cannot assign to `x` because it is borrowed");
}

#[test]
fn returning_a_reference_to_a_local_is_rejected() {
    let p = program(vec![func(
        "dangle",
        Vec::new(),
        Some(ref_ty(false, None, ty("i32"))),
        block(vec![let_("x", int(1))], Some(borrow(var("x")))),
    )]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::LifetimeViolation);
    assert_eq!(err.message, "cannot return reference to local variable `x`");
}

#[test]
fn returning_a_parameter_reference_is_fine() {
    let p = program(vec![func(
        "first",
        vec![typed("a", ref_ty(false, None, ty("i32")))],
        Some(ref_ty(false, None, ty("i32"))),
        var("a"),
    )]);
    assert_clean(&check(&p));
}

#[test]
fn returned_reference_must_carry_the_declared_lifetime() {
    let pick = |body: &str| {
        lifetime_func(
            "pick",
            &["a", "b"],
            vec![
                typed("x", ref_ty(false, Some("a"), ty("i32"))),
                typed("y", ref_ty(false, Some("b"), ty("i32"))),
            ],
            Some(ref_ty(false, Some("a"), ty("i32"))),
            var(body),
        )
    };

    let out = check(&program(vec![pick("y")]));
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::LifetimeViolation);
    assert!(err.message.starts_with("lifetime mismatch"), "{}", err.message);

    assert_clean(&check(&program(vec![pick("x")])));
}

#[test]
fn borrow_escaping_its_block_does_not_live_long_enough() {
    let inner = block(vec![let_("y", int(5))], Some(borrow(var("y"))));
    let p = program(vec![main_fn(vec![let_("r", inner)])]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::LifetimeViolation);
    assert_eq!(err.message, "`y` does not live long enough");
}

#[test]
fn outer_reference_to_inner_binding_does_not_live_long_enough() {
    let p = program(vec![
        read_fn(),
        main_fn(vec![
            let_("a", int(1)),
            let_mut("r", borrow(var("a"))),
            expr_stmt(block(
                vec![
                    let_("y", int(5)),
                    expr_stmt(assign(var("r"), borrow(var("y")))),
                ],
                None,
            )),
            expr_stmt(call("read", vec![var("r")])),
        ]),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::LifetimeViolation);
    assert_eq!(err.message, "`y` does not live long enough");
}

#[test]
fn match_binding_moves_the_scrutinee() {
    let p = program(vec![
        token_struct(),
        option_enum(),
        consume_fn(),
        main_fn(vec![
            let_("opt", variant("Option", "Some", vec![token()])),
            expr_stmt(match_(
                var("opt"),
                vec![
                    (
                        p_variant("Option", "Some", vec![p_bind("t")]),
                        call("consume", vec![var("t")]),
                    ),
                    (p_variant("Option", "None", Vec::new()), unit()),
                ],
            )),
            let_("again", var("opt")),
        ]),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::UseAfterMove);
    assert_eq!(err.message, "use of moved value: `opt`");
}

#[test]
fn closure_capturing_by_value_moves_the_capture() {
    let p = program(vec![
        token_struct(),
        consume_fn(),
        main_fn(vec![
            let_("t", token()),
            let_("f", lambda(&[], call("consume", vec![var("t")]))),
            expr_stmt(call("consume", vec![var("t")])),
        ]),
    ]);
    let out = check(&p);
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::UseAfterMove);
    assert_eq!(err.message, "use of moved value: `t`");
}

#[test]
fn non_exhaustive_matches_name_a_witness() {
    let p = program(vec![
        option_enum(),
        func(
            "unwrap_or_zero",
            vec![typed("o", ty_args("Option", vec![ty("i32")]))],
            Some(ty("i32")),
            match_(
                var("o"),
                vec![(p_variant("Option", "Some", vec![p_bind("v")]), var("v"))],
            ),
        ),
        func(
            "flip",
            vec![typed("b", ty("bool"))],
            Some(ty("bool")),
            match_(var("b"), vec![(p_bool(true), boolean(false))]),
        ),
    ]);
    let out = check(&p);
    assert_eq!(
        kinds(&out),
        vec![ErrorKind::NonExhaustiveMatch, ErrorKind::NonExhaustiveMatch]
    );
    assert!(out.diagnostics[0].message.contains("None"), "{}", out.diagnostics[0].message);
    assert!(out.diagnostics[1].message.contains("`false`"), "{}", out.diagnostics[1].message);
    assert!(out.program.functions.is_empty());
}

#[test]
fn wildcard_arms_make_a_match_exhaustive() {
    let p = program(vec![func(
        "classify",
        vec![typed("n", ty("i32"))],
        Some(ty("str")),
        match_(
            var("n"),
            vec![(p_int(0), string("zero")), (p_wild(), string("other"))],
        ),
    )]);
    assert_clean(&check(&p));
}

#[test]
fn accepted_items_carry_ownership_annotations() {
    let p = program(vec![
        token_struct(),
        peek_fn(),
        main_fn(vec![
            let_("t", token()),
            let_("a", borrow(var("t"))),
            let_("b", borrow(var("t"))),
            expr_stmt(call("peek", vec![var("a")])),
            expr_stmt(call("peek", vec![var("b")])),
        ]),
    ]);
    let out = check(&p);
    assert_clean(&out);
    let main = out.program.function("main").expect("main accepted");
    let on_t: Vec<_> = main
        .ownership
        .iter()
        .filter(|a| a.name == "t")
        .map(|a| (a.access, a.fact))
        .collect();
    assert_eq!(
        on_t,
        vec![
            (Access::SharedBorrow, OwnershipFact::Owned),
            (Access::SharedBorrow, OwnershipFact::BorrowedShared(1)),
        ]
    );
}

#[test]
fn moving_out_from_behind_a_reference_is_rejected() {
    let steal = func(
        "steal",
        vec![typed("r", ref_ty(false, None, ty("Token")))],
        Some(ty("Token")),
        at(60, 3, deref(var("r"))),
    );
    let out = check(&program(vec![token_struct(), steal]));
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::ConflictingBorrow);
    assert_eq!(err.span, span(60, 3));
    assert_eq!(err.message, "cannot move out of `r`, which is behind a reference");
    assert!(out.program.function("steal").is_none());
}

#[test]
fn copy_fields_can_be_read_through_a_reference() {
    let id_of = func(
        "id_of",
        vec![typed("r", ref_ty(false, None, ty("Token")))],
        Some(ty("i32")),
        field(var("r"), "id"),
    );
    assert_clean(&check(&program(vec![token_struct(), id_of])));
}

#[test]
fn writing_through_a_shared_reference_is_rejected() {
    let poke = |mutable: bool| {
        func(
            "poke",
            vec![typed("r", ref_ty(mutable, None, ty("i32")))],
            Some(unit_ty()),
            block(
                vec![expr_stmt(assign(at(70, 5, deref(var("r"))), int(5)))],
                None,
            ),
        )
    };

    let out = check(&program(vec![poke(false)]));
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::ConflictingBorrow);
    assert_eq!(err.span, span(70, 5));
    assert_eq!(err.message, "cannot assign through `r`, which is a shared reference");

    assert_clean(&check(&program(vec![poke(true)])));
}

#[test]
fn mutating_methods_need_an_exclusive_receiver() {
    let counter = struct_def("Counter", &[], vec![("n", ty("i32"))]);
    let bump = fn_def(
        "bump",
        vec![self_ref(true)],
        Some(unit_ty()),
        block(
            vec![expr_stmt(assign(
                field(var("self"), "n"),
                binary(field(var("self"), "n"), BinOp::Add, int(1)),
            ))],
            None,
        ),
    );
    let caller = |mutable: bool| {
        func(
            "bump_via",
            vec![typed("c", ref_ty(mutable, None, ty("Counter")))],
            Some(unit_ty()),
            method(at(80, 5, var("c")), "bump", Vec::new()),
        )
    };
    let items = |mutable: bool| {
        program(vec![
            counter.clone(),
            impl_def(Vec::new(), None, ty("Counter"), vec![bump.clone()]),
            caller(mutable),
        ])
    };

    let out = check(&items(false));
    let err = only_error(&out);
    assert_eq!(err.kind, ErrorKind::ConflictingBorrow);
    assert_eq!(err.span, span(80, 5));
    assert_eq!(
        err.message,
        "cannot borrow data as mutable through `c`, which is a shared reference"
    );

    assert_clean(&check(&items(true)));
}

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use grok_ast::{Block, Expr, ExprKind, FnDef, Item, Literal, Program, TypeRef, ident, span};

fn temp_dir(tag: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let dir = std::env::temp_dir().join(format!("grok-cli-{tag}-{}-{ts}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn function(name: &str, line: u32, ret: &str, body: ExprKind) -> Item {
    let s = span(line, 1);
    Item::Function(FnDef {
        span: s,
        name: ident(s, name),
        type_params: Vec::new(),
        lifetimes: Vec::new(),
        params: Vec::new(),
        ret: Some(TypeRef::named(s, ret)),
        body: Expr::new(
            s,
            ExprKind::Block(Block {
                span: s,
                stmts: Vec::new(),
                tail: Some(Box::new(Expr::new(span(line, 20), body))),
            }),
        ),
    })
}

fn write_program(dir: &std::path::Path, program: &Program) -> PathBuf {
    let path = dir.join("input.json");
    std::fs::write(&path, serde_json::to_string(program).expect("serialize")).expect("write input");
    path
}

#[test]
fn check_reports_schemes_as_json() {
    let dir = temp_dir("ok");
    let program = Program {
        items: vec![function("answer", 1, "i32", ExprKind::Literal(Literal::Int(42)))],
    };
    let input = write_program(&dir, &program);

    let out = Command::new(env!("CARGO_BIN_EXE_grok"))
        .args(["check", input.to_str().expect("utf-8 path"), "--format", "json"])
        .current_dir(&dir)
        .output()
        .expect("spawn grok");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success(), "stdout:\n{stdout}\nstderr:\n{}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value = serde_json::from_str(&stdout).expect("json report");
    assert_eq!(report["schema"], "grok.check.v1");
    assert_eq!(report["ok"], true);
    assert_eq!(report["items"][0]["scheme"], "() -> i32");
}

#[test]
fn check_fails_on_semantic_errors() {
    let dir = temp_dir("err");
    let program = Program {
        items: vec![function("wrong", 3, "bool", ExprKind::Literal(Literal::Int(1)))],
    };
    let input = write_program(&dir, &program);

    let out = Command::new(env!("CARGO_BIN_EXE_grok"))
        .args(["check", input.to_str().expect("utf-8 path"), "--serial"])
        .current_dir(&dir)
        .output()
        .expect("spawn grok");
    assert!(!out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("grok::type_mismatch"), "stdout:\n{stdout}");
}

#[test]
fn config_file_is_picked_up_from_the_input_directory() {
    let dir = temp_dir("config");
    std::fs::write(
        dir.join("grok.toml"),
        "[checker]\nint_literals = \"require_annotation\"\n",
    )
    .expect("write config");

    let out = Command::new(env!("CARGO_BIN_EXE_grok"))
        .args(["config", dir.to_str().expect("utf-8 path")])
        .output()
        .expect("spawn grok");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("RequireAnnotation"), "stdout:\n{stdout}");
    assert!(stdout.contains("grok.toml"), "stdout:\n{stdout}");
}

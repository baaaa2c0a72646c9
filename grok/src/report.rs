#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use grok_ast::Span;
use grok_core::{CheckOutcome, SemanticError, TypedFunction, UseAnnotation};
use serde::Serialize;

pub const SCHEMA: &str = "grok.check.v1";

/// Machine-readable result of `grok check --format json`.
#[derive(Debug, Serialize)]
pub struct CheckReport<'a> {
    pub schema: &'static str,
    pub input: String,
    pub ok: bool,
    pub diagnostics: &'a [SemanticError],
    pub items: Vec<ItemReport<'a>>,
}

/// One accepted item: its scheme, the resolved type of every expression and
/// the verified ownership of each use.
#[derive(Debug, Serialize)]
pub struct ItemReport<'a> {
    pub name: &'a str,
    pub scheme: String,
    /// Keyed by the expression's pre-order position in the item body.
    pub types: BTreeMap<usize, ExprType>,
    pub ownership: &'a [UseAnnotation],
}

#[derive(Debug, Serialize)]
pub struct ExprType {
    pub span: Span,
    pub ty: String,
}

fn expr_types(f: &TypedFunction) -> BTreeMap<usize, ExprType> {
    let mut types = BTreeMap::new();
    f.body.walk(&mut |e| {
        let id = types.len();
        types.insert(
            id,
            ExprType {
                span: e.span,
                ty: e.ty.to_string(),
            },
        );
    });
    types
}

impl<'a> CheckReport<'a> {
    pub fn new(input: &Path, outcome: &'a CheckOutcome) -> Self {
        Self {
            schema: SCHEMA,
            input: input.display().to_string(),
            ok: outcome.is_ok(),
            diagnostics: &outcome.diagnostics,
            items: outcome
                .program
                .functions
                .iter()
                .map(|f| ItemReport {
                    name: &f.name,
                    scheme: f.scheme.to_string(),
                    types: expr_types(f),
                    ownership: &f.ownership,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grok_ast::{Expr, ExprKind, FnDef, Item, Literal, Program, TypeRef, ident, span};
    use grok_core::Checker;

    fn program() -> Program {
        let s = span(1, 1);
        Program {
            items: vec![Item::Function(FnDef {
                span: s,
                name: ident(s, "answer"),
                type_params: Vec::new(),
                lifetimes: Vec::new(),
                params: Vec::new(),
                ret: Some(TypeRef::named(s, "i32")),
                body: Expr::new(span(1, 20), ExprKind::Literal(Literal::Int(42))),
            })],
        }
    }

    #[test]
    fn ast_survives_json_round_trip() {
        let p = program();
        let text = serde_json::to_string(&p).expect("serialize");
        let back: Program = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, p);
    }

    #[test]
    fn report_lists_accepted_items() {
        let outcome = Checker::new().check_program(&program()).expect("no internal error");
        let report = CheckReport::new(Path::new("answer.json"), &outcome);
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["schema"], SCHEMA);
        assert_eq!(json["ok"], true);
        assert_eq!(json["items"][0]["name"], "answer");
        assert_eq!(json["items"][0]["scheme"], "() -> i32");
    }

    #[test]
    fn report_carries_resolved_expression_types() {
        let outcome = Checker::new().check_program(&program()).expect("no internal error");
        let report = CheckReport::new(Path::new("answer.json"), &outcome);
        let json = serde_json::to_value(&report).expect("serialize");
        let body = &json["items"][0]["types"]["0"];
        assert_eq!(body["ty"], "i32");
        assert_eq!(body["span"]["line"], 1);
        assert_eq!(body["span"]["col"], 20);
    }
}

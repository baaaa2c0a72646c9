#![forbid(unsafe_code)]

//! Match exhaustiveness by constructor splitting.
//!
//! `bool`, unit, tuples, structs and enums have finite constructor sets;
//! every other type is treated as infinite and needs a catch-all arm.

use std::fmt;

use grok_ast::Literal;

use crate::error::{ErrorKind, SemanticError};
use crate::symbols::SymbolTable;
use crate::typed::{PatternKind, TypedExpr, TypedExprKind, TypedPattern};
use crate::types::{TyVar, TyVarId, Type};

#[derive(Clone, Debug, PartialEq)]
enum Ctor {
    Bool(bool),
    Unit,
    Tuple(usize),
    Struct { name: String, fields: Vec<String> },
    Variant { enum_name: String, variant: String, arity: usize },
    /// A literal of an infinite domain.
    Lit(String),
}

impl Ctor {
    fn arity(&self) -> usize {
        match self {
            Ctor::Bool(_) | Ctor::Unit | Ctor::Lit(_) => 0,
            Ctor::Tuple(n) => *n,
            Ctor::Struct { fields, .. } => fields.len(),
            Ctor::Variant { arity, .. } => *arity,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Pat {
    Wild,
    Ctor(Ctor, Vec<Pat>),
}

impl fmt::Display for Pat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, args: &[Pat]| -> fmt::Result {
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{a}")?;
            }
            Ok(())
        };
        match self {
            Pat::Wild => f.write_str("_"),
            Pat::Ctor(Ctor::Bool(b), _) => write!(f, "{b}"),
            Pat::Ctor(Ctor::Unit, _) => f.write_str("()"),
            Pat::Ctor(Ctor::Lit(text), _) => f.write_str(text),
            Pat::Ctor(Ctor::Tuple(_), args) => {
                f.write_str("(")?;
                list(f, args)?;
                f.write_str(")")
            }
            Pat::Ctor(Ctor::Struct { name, fields }, args) => {
                write!(f, "{name} {{ ")?;
                for (i, (field, a)) in fields.iter().zip(args).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}: {a}")?;
                }
                f.write_str(" }")
            }
            Pat::Ctor(Ctor::Variant { enum_name, variant, .. }, args) => {
                write!(f, "{enum_name}::{variant}")?;
                if !args.is_empty() {
                    f.write_str("(")?;
                    list(f, args)?;
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

/// Stand-in type for positions whose type is unknown; its domain is infinite.
fn opaque() -> Type {
    Type::Variable(TyVar::new(TyVarId(u32::MAX)))
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(n) => n.to_string(),
        Literal::Float(x) => x.to_string(),
        Literal::Str(s) => format!("{s:?}"),
        Literal::Bool(b) => b.to_string(),
        Literal::Unit => "()".to_string(),
    }
}

struct Matcher<'a> {
    symbols: &'a SymbolTable,
}

impl Matcher<'_> {
    fn lower(&self, p: &TypedPattern) -> Pat {
        match &p.kind {
            PatternKind::Wildcard | PatternKind::Binding(_) => Pat::Wild,
            PatternKind::Literal(Literal::Bool(b)) => Pat::Ctor(Ctor::Bool(*b), Vec::new()),
            PatternKind::Literal(Literal::Unit) => Pat::Ctor(Ctor::Unit, Vec::new()),
            PatternKind::Literal(lit) => Pat::Ctor(Ctor::Lit(render_literal(lit)), Vec::new()),
            PatternKind::Tuple(elems) => Pat::Ctor(
                Ctor::Tuple(elems.len()),
                elems.iter().map(|e| self.lower(e)).collect(),
            ),
            PatternKind::Variant {
                enum_name,
                variant,
                fields,
            } => Pat::Ctor(
                Ctor::Variant {
                    enum_name: enum_name.clone(),
                    variant: variant.clone(),
                    arity: fields.len(),
                },
                fields.iter().map(|f| self.lower(f)).collect(),
            ),
            PatternKind::Struct { name, fields } => {
                // Positional, in declaration order; unnamed fields are wildcards.
                let declared = self.struct_fields(&p.ty).unwrap_or_else(|| {
                    fields.iter().map(|(n, _)| n.clone()).collect()
                });
                let args = declared
                    .iter()
                    .map(|d| {
                        fields
                            .iter()
                            .find(|(n, _)| n == d)
                            .map_or(Pat::Wild, |(_, fp)| self.lower(fp))
                    })
                    .collect();
                Pat::Ctor(
                    Ctor::Struct {
                        name: name.clone(),
                        fields: declared,
                    },
                    args,
                )
            }
        }
    }

    fn struct_fields(&self, ty: &Type) -> Option<Vec<String>> {
        match self.symbols.expand(ty).ok()? {
            Type::Struct(st) => Some(st.fields.iter().map(|(n, _)| n.clone()).collect()),
            _ => None,
        }
    }

    /// Every constructor of `ty`, or `None` for infinite domains.
    fn ctors_of(&self, ty: &Type) -> Option<Vec<Ctor>> {
        if ty.is_unit() {
            return Some(vec![Ctor::Unit]);
        }
        if *ty == Type::bool() {
            return Some(vec![Ctor::Bool(true), Ctor::Bool(false)]);
        }
        if let Some(elems) = ty.tuple_elems() {
            return Some(vec![Ctor::Tuple(elems.len())]);
        }
        if let Some(fields) = self.struct_fields(ty) {
            let name = ty.head_name()?.to_string();
            return Some(vec![Ctor::Struct { name, fields }]);
        }
        match ty {
            Type::Generic(name, _) => {
                let info = self.symbols.enums.get(name)?;
                Some(
                    info.variants
                        .iter()
                        .map(|v| Ctor::Variant {
                            enum_name: name.clone(),
                            variant: v.name.clone(),
                            arity: v.fields.len(),
                        })
                        .collect(),
                )
            }
            _ => None,
        }
    }

    /// Types of a constructor's fields when matched against `ty`.
    fn field_types(&self, ctor: &Ctor, ty: &Type) -> Vec<Type> {
        let fallback = || vec![opaque(); ctor.arity()];
        match ctor {
            Ctor::Tuple(_) => ty.tuple_elems().map_or_else(fallback, <[Type]>::to_vec),
            Ctor::Struct { .. } => match self.symbols.expand(ty) {
                Ok(Type::Struct(st)) => st.fields.into_iter().map(|(_, t)| t).collect(),
                _ => fallback(),
            },
            Ctor::Variant {
                enum_name, variant, ..
            } => match ty {
                Type::Generic(_, args) => match self.symbols.variant_fields(enum_name, variant, args) {
                    Some(Ok(tys)) => tys,
                    _ => fallback(),
                },
                _ => fallback(),
            },
            Ctor::Bool(_) | Ctor::Unit | Ctor::Lit(_) => Vec::new(),
        }
    }

    fn same_ctor(a: &Ctor, b: &Ctor) -> bool {
        match (a, b) {
            (Ctor::Struct { name: x, .. }, Ctor::Struct { name: y, .. }) => x == y,
            _ => a == b,
        }
    }

    /// Rows whose head matches `ctor`, with the head replaced by its fields.
    fn specialize(rows: &[Vec<Pat>], ctor: &Ctor) -> Vec<Vec<Pat>> {
        rows.iter()
            .filter_map(|row| {
                let (head, rest) = row.split_first()?;
                let mut out = match head {
                    Pat::Wild => vec![Pat::Wild; ctor.arity()],
                    Pat::Ctor(c, args) if Self::same_ctor(c, ctor) => args.clone(),
                    Pat::Ctor(..) => return None,
                };
                out.extend(rest.iter().cloned());
                Some(out)
            })
            .collect()
    }

    /// Returns a witness vector not matched by any row, if one exists.
    ///
    /// `tys` holds one type per column of `rows`.
    fn uncovered(&self, rows: &[Vec<Pat>], tys: &[Type]) -> Option<Vec<Pat>> {
        let Some((ty, rest_tys)) = tys.split_first() else {
            return rows.is_empty().then(Vec::new);
        };
        let used: Vec<&Ctor> = rows
            .iter()
            .filter_map(|r| match r.first() {
                Some(Pat::Ctor(c, _)) => Some(c),
                _ => None,
            })
            .collect();
        let all = self.ctors_of(ty);

        if let Some(all) = &all {
            if !all.is_empty() && all.iter().all(|c| used.iter().any(|u| Self::same_ctor(u, c))) {
                for ctor in all {
                    let mut col_tys = self.field_types(ctor, ty);
                    let arity = col_tys.len();
                    col_tys.extend(rest_tys.iter().cloned());
                    if let Some(mut w) = self.uncovered(&Self::specialize(rows, ctor), &col_tys) {
                        let tail = w.split_off(arity);
                        let mut out = vec![Pat::Ctor(ctor.clone(), w)];
                        out.extend(tail);
                        return Some(out);
                    }
                }
                return None;
            }
        }

        let default: Vec<Vec<Pat>> = rows
            .iter()
            .filter(|r| matches!(r.first(), Some(Pat::Wild)))
            .map(|r| r[1..].to_vec())
            .collect();
        let mut w = self.uncovered(&default, rest_tys)?;
        let head = match &all {
            Some(all) if !used.is_empty() => all
                .iter()
                .find(|c| !used.iter().any(|u| Self::same_ctor(u, c)))
                .map_or(Pat::Wild, |c| Pat::Ctor(c.clone(), vec![Pat::Wild; c.arity()])),
            _ => Pat::Wild,
        };
        w.insert(0, head);
        Some(w)
    }

    fn check_match(&self, scrutinee: &TypedExpr, arms: &[crate::typed::TypedArm]) -> Option<String> {
        let rows: Vec<Vec<Pat>> = arms.iter().map(|a| vec![self.lower(&a.pat)]).collect();
        self.uncovered(&rows, std::slice::from_ref(&scrutinee.ty))
            .and_then(|mut w| w.pop())
            .map(|w| w.to_string())
    }
}

/// Reports every non-exhaustive `match` in `body`.
pub fn check_body(body: &TypedExpr, symbols: &SymbolTable) -> Vec<SemanticError> {
    let matcher = Matcher { symbols };
    let mut errors = Vec::new();
    body.walk(&mut |e| {
        if let TypedExprKind::Match { scrutinee, arms } = &e.kind {
            if let Some(witness) = matcher.check_match(scrutinee, arms) {
                errors.push(
                    SemanticError::new(
                        ErrorKind::NonExhaustiveMatch,
                        e.span,
                        format!("non-exhaustive patterns: `{witness}` not covered"),
                    )
                    .involving(scrutinee.ty.to_string()),
                );
            }
        }
    });
    errors
}

#![forbid(unsafe_code)]

//! Structural unification with occurs check.
//!
//! ```text
//! unify(?T1, i32)          => ?T1 := i32
//! unify(?T3, ?T1)          => ?T3 := ?T1   (higher id binds to lower)
//! unify(?T1, ?T1 -> i32)   => occurs check failure
//! unify(i32, i64)          => mismatch, no widening
//! ```
//!
//! Every type constructor is invariant; references compare mutability and
//! pointee but never lifetimes.

use grok_ast::Span;

use crate::error::{ErrorKind, SemanticError};
use crate::subst::Substitution;
use crate::types::Type;

/// Unifies `expected` with `found`, extending `subst`.
///
/// On failure the error names the outermost pair of the constraint; the
/// substitution may hold bindings made before the failing position.
pub fn unify(
    subst: &mut Substitution,
    expected: &Type,
    found: &Type,
    span: Span,
) -> Result<(), SemanticError> {
    let outer_expected = subst.apply(expected);
    let outer_found = subst.apply(found);
    let mut work = vec![(outer_expected.clone(), outer_found.clone())];

    while let Some((a, b)) = work.pop() {
        let a = subst.apply(&a);
        let b = subst.apply(&b);
        match (&a, &b) {
            (Type::Variable(x), Type::Variable(y)) if x.id == y.id => {}
            (Type::Variable(x), Type::Variable(y)) => {
                if x.id > y.id {
                    subst.bind(x.id, b.clone());
                } else {
                    subst.bind(y.id, a.clone());
                }
            }
            (Type::Variable(x), t) | (t, Type::Variable(x)) => {
                if t.occurs(x.id) {
                    return Err(SemanticError::new(
                        ErrorKind::OccursCheckFailure,
                        span,
                        format!("cannot construct the infinite type `{} = {}`", x.id, t),
                    )
                    .involving(outer_expected.to_string())
                    .involving(outer_found.to_string()));
                }
                subst.bind(x.id, t.clone());
            }
            (Type::Primitive(p), Type::Primitive(q)) if p == q => {}
            (Type::Generic(n, xs), Type::Generic(m, ys)) if n == m && xs.len() == ys.len() => {
                push_pairs(&mut work, xs, ys);
            }
            (Type::Function(ps, r), Type::Function(qs, s)) if ps.len() == qs.len() => {
                work.push(((**r).clone(), (**s).clone()));
                push_pairs(&mut work, ps, qs);
            }
            (Type::Struct(s1), Type::Struct(s2))
                if s1.name == s2.name
                    && s1.args.len() == s2.args.len()
                    && s1.fields.len() == s2.fields.len()
                    && s1.fields.iter().zip(&s2.fields).all(|(f, g)| f.0 == g.0) =>
            {
                let f1: Vec<Type> = s1.fields.iter().map(|(_, t)| t.clone()).collect();
                let f2: Vec<Type> = s2.fields.iter().map(|(_, t)| t.clone()).collect();
                push_pairs(&mut work, &f1, &f2);
                push_pairs(&mut work, &s1.args, &s2.args);
            }
            // A recursive struct occurrence against the expanded struct.
            (Type::Struct(s), Type::Generic(n, args)) | (Type::Generic(n, args), Type::Struct(s))
                if s.name == *n && s.args.len() == args.len() =>
            {
                push_pairs(&mut work, &s.args, args);
            }
            (Type::Trait(t1), Type::Trait(t2)) if t1.name == t2.name => {}
            (Type::Reference(m1, _, p1), Type::Reference(m2, _, p2)) if m1 == m2 => {
                work.push(((**p1).clone(), (**p2).clone()));
            }
            _ => return Err(mismatch(&outer_expected, &outer_found, &a, &b, span)),
        }
    }
    Ok(())
}

/// Pushes argument pairs so that they are popped left to right.
fn push_pairs(work: &mut Vec<(Type, Type)>, xs: &[Type], ys: &[Type]) {
    for (x, y) in xs.iter().zip(ys).rev() {
        work.push((x.clone(), y.clone()));
    }
}

fn mismatch(outer_expected: &Type, outer_found: &Type, a: &Type, b: &Type, span: Span) -> SemanticError {
    let mut message = format!("expected `{outer_expected}`, found `{outer_found}`");
    if a != outer_expected || b != outer_found {
        message.push_str(&format!(" (`{a}` is incompatible with `{b}`)"));
    }
    SemanticError::new(ErrorKind::TypeMismatch, span, message)
        .involving(outer_expected.to_string())
        .involving(outer_found.to_string())
}

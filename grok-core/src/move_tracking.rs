#![forbid(unsafe_code)]

//! Move classification: which types copy, which expressions consume their
//! operand and which name storage that can be borrowed.

use crate::traits::TraitResolver;
use crate::typed::{TypedExpr, TypedExprKind, TypedPattern};
use crate::types::{Lifetime, Mutability, Type};

/// Ownership classification of a value type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// Implements `Copy`: uses duplicate the value.
    Copyable,
    /// Uses by value move the value out of its binding.
    Affine,
    /// `&mut T`: not `Copy`, but reborrowed when passed as an argument.
    ExclusiveRef,
}

pub fn classify_type(ty: &Type, resolver: &TraitResolver<'_>) -> ValueKind {
    match ty {
        Type::Reference(Mutability::Exclusive, _, _) => ValueKind::ExclusiveRef,
        _ if resolver.is_copy(ty) => ValueKind::Copyable,
        _ => ValueKind::Affine,
    }
}

/// How the value of an expression is consumed by its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UseContext {
    /// The value is moved unless its type is `Copy`.
    Move,
    /// The value is only inspected.
    Read,
    /// A call argument: moved, except that `&mut` references are reborrowed.
    Argument,
}

/// Expressions that denote storage: locals, their fields and dereferences.
pub fn is_place(e: &TypedExpr) -> bool {
    match &e.kind {
        TypedExprKind::Local(_) | TypedExprKind::Deref(_) => true,
        TypedExprKind::Field { base, .. } => is_place(base),
        _ => false,
    }
}

/// Whether matching `pat` moves part of the scrutinee into a binding.
pub fn binds_by_value(pat: &TypedPattern, is_copy: &dyn Fn(&Type) -> bool) -> bool {
    pat.bindings().iter().any(|(_, _, ty)| !is_copy(ty))
}

/// Lifetime of the outermost reference in `ty`, if it has one.
pub fn reference_lifetime(ty: &Type) -> Option<&Lifetime> {
    match ty {
        Type::Reference(_, lt, _) => Some(lt),
        Type::Generic(_, args) => args.iter().find_map(reference_lifetime),
        Type::Struct(st) => st.args.iter().find_map(reference_lifetime),
        _ => None,
    }
}

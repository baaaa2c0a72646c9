#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use grok_ast::Span;
use serde::Serialize;

use crate::types::Type;

/// Index of a binding in the verifier's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingId(pub usize);

/// Program point: pre-order index of an expression in a function body.
pub type Point = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoanId(pub usize);

/// Ownership state of a binding just before a use.
///
/// At most one exclusive loan, or any number of shared loans, can be live on
/// a binding at once. A breach of that rule is a checker defect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OwnershipFact {
    Owned,
    Moved,
    /// Number of live shared loans.
    BorrowedShared(u32),
    BorrowedExclusive,
}

impl fmt::Display for OwnershipFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnershipFact::Owned => f.write_str("owned"),
            OwnershipFact::Moved => f.write_str("moved"),
            OwnershipFact::BorrowedShared(n) => write!(f, "borrowed (shared x{n})"),
            OwnershipFact::BorrowedExclusive => f.write_str("borrowed (exclusive)"),
        }
    }
}

/// How a use touches its binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Access {
    Copy,
    Move,
    Read,
    SharedBorrow,
    ExclusiveBorrow,
    Assign,
}

/// One entry of the per-use ownership annotation attached to a typed item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UseAnnotation {
    pub span: Span,
    pub name: String,
    pub access: Access,
    pub fact: OwnershipFact,
}

/// Move state of a binding along one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveState {
    /// Moved on every path reaching this point.
    Moved { at: Span },
    /// Moved on some path reaching this point.
    MaybeMoved { at: Span },
}

impl MoveState {
    pub fn at(&self) -> Span {
        match self {
            MoveState::Moved { at } | MoveState::MaybeMoved { at } => *at,
        }
    }
}

/// Static facts about a binding, fixed at declaration.
#[derive(Clone, Debug)]
pub struct BindingInfo {
    pub name: String,
    pub span: Span,
    pub ty: Type,
    /// Values of this type are copied, never moved.
    pub copy: bool,
    /// Innermost enclosing lambda, by the lambda's point.
    pub lambda: Option<Point>,
}

#[derive(Clone, Debug)]
pub struct Loan {
    pub target: BindingId,
    pub mutable: bool,
    pub span: Span,
    pub point: Point,
}

impl Loan {
    pub fn describe(&self) -> &'static str {
        if self.mutable { "mutable" } else { "immutable" }
    }
}

/// Where a value's references may point.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    Loan(LoanId),
    /// The caller's region behind a reference parameter.
    Param {
        binding: BindingId,
        lifetime: Option<String>,
    },
}

pub type Origins = BTreeSet<Origin>;

/// Kind of access a lambda makes to a captured binding; ordered by strength.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CaptureKind {
    Shared,
    Exclusive,
    ByValue,
}

#![forbid(unsafe_code)]

use grok_ast::Span;

use crate::types::Type;

/// A deferred method call: resolved once the receiver's head type is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodConstraint {
    pub receiver: Type,
    pub method: String,
    pub args: Vec<Type>,
    pub arg_spans: Vec<Span>,
    pub ret: Type,
    pub span: Span,
    /// Index into the collector's dispatch table.
    pub slot: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constraint {
    /// `left` is the expected type, `right` the one found.
    Equal { left: Type, right: Type, span: Span },
    Bound { ty: Type, trait_name: String, span: Span },
    Method(MethodConstraint),
}

/// Append-only constraint log with a cursor marking what has been solved.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    items: Vec<Constraint>,
    solved: usize,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, c: Constraint) {
        self.items.push(c);
    }

    pub fn equal(&mut self, left: Type, right: Type, span: Span) {
        self.push(Constraint::Equal { left, right, span });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_unsolved(&self) -> bool {
        self.solved < self.items.len()
    }

    /// Hands out the next unsolved constraint and advances the cursor.
    pub fn next_unsolved(&mut self) -> Option<Constraint> {
        let c = self.items.get(self.solved).cloned()?;
        self.solved += 1;
        Some(c)
    }

    pub fn all(&self) -> &[Constraint] {
        &self.items
    }
}

#![forbid(unsafe_code)]

use std::fmt;

use grok_ast::Span;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// User-facing diagnostic categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorKind {
    UnboundName,
    TypeMismatch,
    OccursCheckFailure,
    UnsatisfiedBound,
    AmbiguousTraitResolution,
    UseAfterMove,
    ConflictingBorrow,
    LifetimeViolation,
    NonExhaustiveMatch,
    /// A type could not be determined without a written annotation.
    AnnotationRequired,
    DuplicateDefinition,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::UnboundName => "grok::unbound_name",
            ErrorKind::TypeMismatch => "grok::type_mismatch",
            ErrorKind::OccursCheckFailure => "grok::occurs_check",
            ErrorKind::UnsatisfiedBound => "grok::unsatisfied_bound",
            ErrorKind::AmbiguousTraitResolution => "grok::ambiguous_trait_resolution",
            ErrorKind::UseAfterMove => "grok::use_after_move",
            ErrorKind::ConflictingBorrow => "grok::conflicting_borrow",
            ErrorKind::LifetimeViolation => "grok::lifetime_violation",
            ErrorKind::NonExhaustiveMatch => "grok::non_exhaustive_match",
            ErrorKind::AnnotationRequired => "grok::annotation_required",
            ErrorKind::DuplicateDefinition => "grok::duplicate_definition",
        }
    }

    pub fn help(self) -> Option<&'static str> {
        match self {
            ErrorKind::OccursCheckFailure => {
                Some("a value cannot be applied to itself; this would need an infinite type")
            }
            ErrorKind::AmbiguousTraitResolution => {
                Some("remove one of the overlapping implementations")
            }
            ErrorKind::UseAfterMove => {
                Some("borrow the value instead of moving it, or implement `Copy` for its type")
            }
            ErrorKind::ConflictingBorrow => {
                Some("end the earlier borrow (stop using it) before this point")
            }
            ErrorKind::LifetimeViolation => {
                Some("the referenced value must outlive every use of the reference")
            }
            ErrorKind::NonExhaustiveMatch => {
                Some("add an arm for the missing pattern or a wildcard `_` arm")
            }
            ErrorKind::AnnotationRequired => Some("add a type annotation"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnboundName => "unbound name",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::OccursCheckFailure => "occurs check failure",
            ErrorKind::UnsatisfiedBound => "unsatisfied bound",
            ErrorKind::AmbiguousTraitResolution => "ambiguous trait resolution",
            ErrorKind::UseAfterMove => "use after move",
            ErrorKind::ConflictingBorrow => "conflicting borrow",
            ErrorKind::LifetimeViolation => "lifetime violation",
            ErrorKind::NonExhaustiveMatch => "non-exhaustive match",
            ErrorKind::AnnotationRequired => "annotation required",
            ErrorKind::DuplicateDefinition => "duplicate definition",
        };
        f.write_str(s)
    }
}

/// A secondary location attached to a diagnostic (move site, earlier borrow, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelatedLocation {
    pub span: Span,
    pub message: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[error("{kind}: {message}")]
pub struct SemanticError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    /// Rendered types and names the diagnostic is about.
    pub involved: Vec<String>,
    pub related: Vec<RelatedLocation>,
    /// Top-level item the diagnostic was raised in; filled in by the driver.
    pub item: Option<String>,
}

impl SemanticError {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            involved: Vec::new(),
            related: Vec::new(),
            item: None,
        }
    }

    pub fn involving(mut self, what: impl Into<String>) -> Self {
        self.involved.push(what.into());
        self
    }

    pub fn with_related(mut self, span: Span, message: impl Into<String>) -> Self {
        self.related.push(RelatedLocation {
            span,
            message: message.into(),
        });
        self
    }

    pub fn in_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }
}

impl Diagnostic for SemanticError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let mut lines = vec![format!("at {}", self.span)];
        for rel in &self.related {
            lines.push(format!("{}: {}", rel.span, rel.message));
        }
        if let Some(help) = self.kind.help() {
            lines.push(help.to_string());
        }
        Some(Box::new(lines.join("\n")))
    }
}

/// A defect in the checker itself. Aborts the whole run.
#[derive(Debug, Error, Diagnostic)]
#[error("internal checker error in `{item}`: {message}")]
#[diagnostic(
    code(grok::internal),
    help("this is a bug in the checker; the captured state is attached below")
)]
pub struct InternalError {
    pub message: String,
    pub item: String,
    /// Dump of the checker state at the point of failure.
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use grok_ast::span;

    #[test]
    fn builder_collects_related_locations() {
        let err = SemanticError::new(ErrorKind::UseAfterMove, span(4, 5), "use of moved value `x`")
            .involving("x")
            .with_related(span(3, 13), "value moved here")
            .in_item("main");
        assert_eq!(err.related.len(), 1);
        assert_eq!(err.item.as_deref(), Some("main"));
        assert_eq!(err.to_string(), "use after move: use of moved value `x`");
    }

    #[test]
    fn diagnostic_code_follows_kind() {
        let err = SemanticError::new(ErrorKind::ConflictingBorrow, span(1, 1), "boom");
        let code = Diagnostic::code(&err).map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("grok::conflicting_borrow"));
    }
}

#![forbid(unsafe_code)]

//! Plain-text rendering of semantic diagnostics at the configured verbosity.

use crate::config::Verbosity;
use crate::error::SemanticError;

/// Renders one diagnostic.
///
/// `Quiet` prints a single line. `Normal` adds related locations and help.
/// `Verbose` also lists the types and names involved.
pub fn render(err: &SemanticError, verbosity: Verbosity) -> String {
    let mut out = format!("error[{}]: {} at {}", err.kind.code(), err.message, err.span);
    if let Some(item) = &err.item {
        out.push_str(&format!(" (in `{item}`)"));
    }
    if verbosity == Verbosity::Quiet {
        return out;
    }
    for r in &err.related {
        out.push_str(&format!("\n  note: {} at {}", r.message, r.span));
    }
    if let Some(help) = err.kind.help() {
        out.push_str(&format!("\n  help: {help}"));
    }
    if verbosity == Verbosity::Verbose && !err.involved.is_empty() {
        out.push_str(&format!("\n  involved: {}", err.involved.join(", ")));
    }
    out
}

/// Renders every diagnostic, separated by blank lines, with a summary line.
pub fn render_all(errors: &[SemanticError], verbosity: Verbosity) -> String {
    let mut out = String::new();
    for e in errors {
        out.push_str(&render(e, verbosity));
        out.push_str("\n\n");
    }
    match errors.len() {
        0 => out.push_str("no errors"),
        1 => out.push_str("1 error"),
        n => out.push_str(&format!("{n} errors")),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use grok_ast::span;

    fn sample() -> SemanticError {
        SemanticError::new(ErrorKind::UseAfterMove, span(4, 5), "use of moved value: `s`")
            .involving("s")
            .with_related(span(3, 9), "value moved here")
            .in_item("main")
    }

    #[test]
    fn quiet_is_one_line() {
        let text = render(&sample(), Verbosity::Quiet);
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("grok::use_after_move"));
        assert!(text.contains("in `main`"));
    }

    #[test]
    fn normal_adds_notes_and_help() {
        let text = render(&sample(), Verbosity::Normal);
        assert!(text.contains("note: value moved here at 3:9"));
        assert!(text.contains("help:"));
        assert!(!text.contains("involved"));
    }

    #[test]
    fn verbose_lists_involved_names() {
        let text = render(&sample(), Verbosity::Verbose);
        assert!(text.contains("involved: s"));
    }

    #[test]
    fn summary_counts_errors() {
        assert!(render_all(&[], Verbosity::Normal).ends_with("no errors"));
        assert!(render_all(&[sample(), sample()], Verbosity::Quiet).ends_with("2 errors"));
    }
}

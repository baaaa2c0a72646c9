#![forbid(unsafe_code)]

use serde::Deserialize;

/// How much detail rendered diagnostics carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Typing of integer literals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntLiteralMode {
    /// Every integer literal is an `i32`.
    #[default]
    DefaultI32,
    /// Integer literals take their width from context; an unresolved width is an error.
    RequireAnnotation,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub verbosity: Verbosity,
    pub int_literals: IntLiteralMode,
    /// Analyse independent items on the rayon pool.
    pub parallel: bool,
    /// Re-check substitution idempotence after every item.
    pub verify_invariants: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            int_literals: IntLiteralMode::DefaultI32,
            parallel: true,
            verify_invariants: true,
        }
    }
}

impl CheckerConfig {
    pub fn with_int_literals(mut self, mode: IntLiteralMode) -> Self {
        self.int_literals = mode;
        self
    }

    pub fn serial(mut self) -> Self {
        self.parallel = false;
        self
    }
}

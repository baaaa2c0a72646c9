#![forbid(unsafe_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use miette::{Diagnostic, IntoDiagnostic};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use grok_ast::Program;
use grok_core::{Checker, CheckerConfig, IntLiteralMode, Verbosity, diagnostics};

mod manifest;
mod report;

#[derive(Parser, Debug)]
#[command(
    name = "grok",
    version,
    about = "Type inference and ownership checking over a parsed AST"
)]
struct Cli {
    /// Read checker settings from this file instead of the nearest `grok.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    /// One rendered diagnostic per error, then a summary line
    Text,
    /// `grok.check.v1` report with schemes and ownership annotations
    Json,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Infer types, resolve traits and verify ownership for a JSON-encoded AST
    Check {
        /// Input AST (JSON)
        path: PathBuf,

        /// Integer literals take their width from context; unresolved widths are errors
        #[arg(long, default_value_t = false)]
        require_int_annotations: bool,

        /// Analyse items on the calling thread only
        #[arg(long, default_value_t = false)]
        serial: bool,

        /// One line per diagnostic
        #[arg(short, long, conflicts_with = "verbose")]
        quiet: bool,

        /// Include the types and names involved in each diagnostic
        #[arg(short, long)]
        verbose: bool,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print the effective checker configuration for a directory
    Config {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[derive(Debug, Error, Diagnostic)]
#[error("{path}: invalid AST: {message}")]
#[diagnostic(code(grok::input), help("the input must be a JSON-encoded `Program`"))]
struct InputError {
    path: String,
    message: String,
}

#[derive(Debug, Error, Diagnostic)]
#[error("check failed with {count} error(s)")]
#[diagnostic(code(grok::check_failed))]
struct CheckFailed {
    count: usize,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Check {
            path,
            require_int_annotations,
            serial,
            quiet,
            verbose,
            format,
        } => {
            let resolved = manifest::load_config(cli.config.as_deref(), &path)?;
            let mut config = resolved.checker;
            if require_int_annotations {
                config.int_literals = IntLiteralMode::RequireAnnotation;
            }
            if serial {
                config.parallel = false;
            }
            if quiet {
                config.verbosity = Verbosity::Quiet;
            } else if verbose {
                config.verbosity = Verbosity::Verbose;
            }

            init_tracing(config.verbosity);
            if let Some(p) = &resolved.path {
                tracing::debug!(config = %p.display(), "loaded configuration");
            }

            check(&path, config, format)
        }
        Cmd::Config { path } => {
            let resolved = manifest::load_config(cli.config.as_deref(), &path)?;
            match &resolved.path {
                Some(p) => println!("# from {}", p.display()),
                None => println!("# defaults (no {} found)", manifest::CONFIG_FILE),
            }
            println!("{:#?}", resolved.checker);
            Ok(())
        }
    }
}

fn check(path: &Path, config: CheckerConfig, format: Format) -> miette::Result<()> {
    let raw = fs::read_to_string(path).into_diagnostic()?;
    let program: Program = serde_json::from_str(&raw).map_err(|e| InputError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let verbosity = config.verbosity;
    let outcome = Checker::with_config(config).check_program(&program)?;

    match format {
        Format::Text => println!("{}", diagnostics::render_all(&outcome.diagnostics, verbosity)),
        Format::Json => {
            let report = report::CheckReport::new(path, &outcome);
            println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        }
    }

    if outcome.is_ok() {
        Ok(())
    } else {
        Err(CheckFailed {
            count: outcome.diagnostics.len(),
        }
        .into())
    }
}

/// `GROK_LOG` takes precedence; otherwise the level follows the verbosity.
fn init_tracing(verbosity: Verbosity) {
    let default = match verbosity {
        Verbosity::Quiet => "error",
        Verbosity::Normal => "warn",
        Verbosity::Verbose => "grok_core=debug",
    };
    let filter = EnvFilter::try_from_env("GROK_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use grok_core::CheckerConfig;
use miette::Diagnostic;
use thiserror::Error;

pub const CONFIG_FILE: &str = "grok.toml";

#[derive(Debug, Error, Diagnostic)]
#[error("config error: {message}")]
#[diagnostic(code(grok::config))]
pub struct ConfigError {
    pub message: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
struct Manifest {
    #[serde(default)]
    checker: CheckerConfig,
}

/// Checker settings and the file they came from, if any.
#[derive(Clone, Debug, Default)]
pub struct ResolvedConfig {
    pub path: Option<PathBuf>,
    pub checker: CheckerConfig,
}

/// Nearest `grok.toml` at or above `start`.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    let mut cur = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        let candidate = cur.join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        match cur.parent() {
            Some(p) => cur = p.to_path_buf(),
            None => return None,
        }
    }
}

/// Loads `explicit` if given, else the nearest `grok.toml` above `start`.
/// Without either, the defaults apply.
pub fn load_config(explicit: Option<&Path>, start: &Path) -> Result<ResolvedConfig, ConfigError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match find_config(start) {
            Some(p) => p,
            None => return Ok(ResolvedConfig::default()),
        },
    };

    let raw = fs::read_to_string(&path).map_err(|e| ConfigError {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    let checker = parse_config(&raw).map_err(|e| ConfigError {
        message: format!("failed to parse {}: {}", path.display(), e.message),
    })?;

    Ok(ResolvedConfig {
        path: Some(path),
        checker,
    })
}

/// Parses the `[checker]` table of a config file. Missing keys keep their defaults.
pub fn parse_config(raw: &str) -> Result<CheckerConfig, ConfigError> {
    let parsed: Manifest = toml::from_str(raw).map_err(|e| ConfigError {
        message: e.to_string(),
    })?;
    Ok(parsed.checker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grok_core::{IntLiteralMode, Verbosity};

    #[test]
    fn empty_file_keeps_defaults() {
        let cfg = parse_config("").expect("parse");
        assert_eq!(cfg, CheckerConfig::default());
        assert!(cfg.parallel);
    }

    #[test]
    fn checker_table_overrides_fields() {
        let cfg = parse_config(
            r#"
            [checker]
            verbosity = "verbose"
            int_literals = "require_annotation"
            parallel = false
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.verbosity, Verbosity::Verbose);
        assert_eq!(cfg.int_literals, IntLiteralMode::RequireAnnotation);
        assert!(!cfg.parallel);
        assert!(cfg.verify_invariants);
    }

    #[test]
    fn unknown_variants_are_rejected() {
        let err = parse_config("[checker]\nverbosity = \"loud\"\n").expect_err("bad value");
        assert!(err.message.contains("loud") || err.message.contains("variant"));
    }

    fn fresh_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let dir = std::env::temp_dir().join(format!("grok-config-{tag}-{}-{nanos}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = fresh_dir("missing");
        assert!(!dir.join(CONFIG_FILE).exists());
        let resolved = load_config(None, &dir.join("input.json")).expect("load");
        assert_eq!(resolved.path, None);
        assert_eq!(resolved.checker, CheckerConfig::default());
    }

    #[test]
    fn config_is_found_in_an_enclosing_directory() {
        let dir = fresh_dir("nested");
        fs::write(dir.join(CONFIG_FILE), "[checker]\nparallel = false\n").expect("write config");
        let nested = dir.join("src");
        fs::create_dir_all(&nested).expect("create nested dir");
        let resolved = load_config(None, &nested.join("input.json")).expect("load");
        assert_eq!(resolved.path, Some(dir.join(CONFIG_FILE)));
        assert!(!resolved.checker.parallel);
    }
}

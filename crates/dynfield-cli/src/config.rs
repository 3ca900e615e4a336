//! Command line configuration

use anyhow::Context;
use dynfield_eval::{EvalConfig, ProcessInterpreter};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "dynfield=info";

/// Settings read from `--config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// External interpreter; evaluation is unavailable without one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<ProcessInterpreter>,
    /// Evaluation settings
    pub eval: EvalConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            interpreter: None,
            eval: EvalConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from a TOML file
    ///
    /// # Errors
    /// When the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config() {
        let config: CliConfig = toml::from_str(
            r#"
            log_filter = "dynfield=debug"

            [interpreter]
            program = "dynfield-lisp"
            args = ["--strict"]

            [eval]
            timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.log_filter, "dynfield=debug");
        assert_eq!(
            config.interpreter,
            Some(ProcessInterpreter::new("dynfield-lisp").with_args(["--strict"]))
        );
        assert_eq!(config.eval.timeout_ms, 500);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config, CliConfig::default());
    }
}

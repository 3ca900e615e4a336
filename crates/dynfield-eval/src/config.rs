//! Evaluation settings

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Settings applied to every interpreter call of an [`crate::EvaluationClient`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Per-call deadline in milliseconds
    pub timeout_ms: u64,
    /// Extra context forwarded verbatim to the interpreter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
}

impl EvalConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// With interpreter context
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = Some(context);
        self
    }

    /// Deadline as a [`Duration`]
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            context: None,
        }
    }
}

//! Subprocess interpreter
//!
//! Spawns one child per evaluation. The child reads a JSON
//! [`EvaluationRequest`] from stdin and prints exactly one JSON object:
//! `{"type": ..., "value": ...}` on success or `{"error": "..."}` on failure.

use crate::interpreter::{EvaluationRequest, EvaluationResponse, Interpreter, InterpreterError};
use dynfield_value::ValueType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Interpreter reached through an external program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInterpreter {
    /// Program to run
    pub program: String,
    /// Arguments passed on every call
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply {
    Failure {
        error: String,
    },
    Success {
        #[serde(rename = "type")]
        kind: ValueType,
        value: JsonValue,
    },
}

impl ProcessInterpreter {
    /// Interpreter running `program` with no arguments
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// With extra arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait::async_trait]
impl Interpreter for ProcessInterpreter {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, InterpreterError> {
        let payload =
            serde_json::to_vec(request).map_err(|e| InterpreterError::Transport(format!("encode request: {e}")))?;

        debug!(program = %self.program, key = %request.key, field = %request.field_name, "spawning interpreter");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InterpreterError::Transport(format!("failed to spawn {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that answers without reading its input closes the pipe early.
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(InterpreterError::Transport(format!("write request: {e}")));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| InterpreterError::Transport(format!("wait for {}: {e}", self.program)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        match serde_json::from_str::<Reply>(stdout.trim()) {
            Ok(Reply::Success { kind, value }) => Ok(EvaluationResponse::new(kind, value)),
            Ok(Reply::Failure { error }) => Err(InterpreterError::Rejected(error)),
            Err(_) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(InterpreterError::Transport(format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                )))
            }
            Err(e) => Err(InterpreterError::Transport(format!("malformed reply: {e}"))),
        }
    }
}

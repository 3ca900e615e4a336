//! Interpreter boundary
//!
//! The expression language is opaque to this crate. An [`Interpreter`]
//! receives one expression plus addressing context and answers with a typed
//! JSON value or an error message.

use dynfield_store::{ComponentKind, FieldError};
use dynfield_value::ValueType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One evaluation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Kind of the owning entity
    pub component: ComponentKind,
    /// Owning entity key
    pub key: String,
    /// Field being evaluated
    pub field_name: String,
    /// Expression text
    pub expression: String,
    /// Caller-supplied context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
}

/// Successful evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
    /// Type reported by the interpreter
    #[serde(rename = "type")]
    pub kind: ValueType,
    /// Result in JSON form
    pub value: JsonValue,
}

impl EvaluationResponse {
    /// Response of type `kind`
    #[inline]
    #[must_use]
    pub fn new(kind: ValueType, value: JsonValue) -> Self {
        Self { kind, value }
    }
}

/// Interpreter failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpreterError {
    /// Expression rejected: syntax or runtime error
    #[error("{0}")]
    Rejected(String),

    /// Interpreter could not be reached or answered garbage
    #[error("interpreter unavailable: {0}")]
    Transport(String),
}

impl From<InterpreterError> for FieldError {
    fn from(err: InterpreterError) -> Self {
        Self::Evaluation(err.to_string())
    }
}

/// Evaluates expressions
///
/// Implementations must be safe to call concurrently.
#[async_trait::async_trait]
pub trait Interpreter: std::fmt::Debug + Send + Sync {
    /// Evaluate one expression
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, InterpreterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_message_is_kept_verbatim() {
        let err: FieldError = InterpreterError::Rejected("unbalanced parens at 4".into()).into();
        assert_eq!(err, FieldError::Evaluation("unbalanced parens at 4".into()));
    }

    #[test]
    fn response_wire_form() {
        let response: EvaluationResponse = serde_json::from_str(r#"{"type": "integer", "value": 3}"#).unwrap();
        assert_eq!(response, EvaluationResponse::new(ValueType::Integer, serde_json::json!(3)));
    }

    #[test]
    fn request_omits_missing_context() {
        let request = EvaluationRequest {
            component: ComponentKind::Variable,
            key: "sum".into(),
            field_name: "value".into(),
            expression: "(+ 1 2)".into(),
            context: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("context").is_none());
        assert_eq!(json["component"], "variable");
    }
}

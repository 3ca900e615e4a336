//! Error types for field stores
//!
//! One taxonomy shared by the store, the evaluation client and the
//! persistence boundary:
//! - `NotFound` / `Conflict`: key or field addressing problems
//! - `TypeMismatch` / `InvalidTypedValue`: rejected writes, prior value kept
//! - `Evaluation`: interpreter failure, message kept verbatim
//! - `Persistence`: backend write failure, local state rolled back

use dynfield_value::{ValueError, ValueType};
use std::fmt;

/// Errors raised by field store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// Key or field absent
    #[error("not found: {}", field_path(.key, .field))]
    NotFound {
        /// Entity key
        key: String,
        /// Field name, when the key exists but the field does not
        field: Option<String>,
    },

    /// Key or field already exists
    #[error("already exists: {}", field_path(.key, .field))]
    Conflict {
        /// Entity key
        key: String,
        /// Field name, for auxiliary field collisions
        field: Option<String>,
    },

    /// Operation not allowed in the field's current mode or kind
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Literal cannot be coerced to the field's type
    #[error("cannot coerce {literal:?} to {expected}")]
    TypeMismatch {
        /// Declared type of the field
        expected: ValueType,
        /// Rejected input
        literal: String,
    },

    /// Typed value violates an invariant
    #[error("invalid typed value: {0}")]
    InvalidTypedValue(String),

    /// Interpreter rejected or failed to evaluate an expression
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Backend write or read failed
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl FieldError {
    /// Missing entity
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            key: key.into(),
            field: None,
        }
    }

    /// Missing field of an existing entity
    pub fn field_not_found(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::NotFound {
            key: key.into(),
            field: Some(field.into()),
        }
    }

    /// Duplicate entity key
    pub fn key_conflict(key: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.into(),
            field: None,
        }
    }

    /// Duplicate auxiliary field
    pub fn field_conflict(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.into(),
            field: Some(field.into()),
        }
    }

    /// Backend failure
    pub fn persistence(detail: impl fmt::Display) -> Self {
        Self::Persistence(detail.to_string())
    }

    /// Whether repeating the same call may succeed without user changes
    ///
    /// The store never retries on its own; this is for callers that do.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Evaluation(_) | Self::Persistence(_))
    }
}

impl From<ValueError> for FieldError {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::TypeMismatch { expected, literal } => Self::TypeMismatch { expected, literal },
            ValueError::InvalidTypedValue(msg) => Self::InvalidTypedValue(msg),
            ValueError::UnknownType(tag) => Self::InvalidTypedValue(format!("unknown value type '{tag}'")),
        }
    }
}

/// Result type alias for field store operations
pub type FieldResult<T> = Result<T, FieldError>;

fn field_path(key: &str, field: &Option<String>) -> String {
    match field {
        Some(field) => format!("'{key}.{field}'"),
        None => format!("'{key}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        assert_eq!(FieldError::key_not_found("retries").to_string(), "not found: 'retries'");
        assert_eq!(
            FieldError::field_not_found("retries", "limit").to_string(),
            "not found: 'retries.limit'"
        );
    }

    #[test]
    fn value_errors_map_onto_taxonomy() {
        let err: FieldError = ValueError::mismatch(ValueType::Integer, "x").into();
        assert!(matches!(err, FieldError::TypeMismatch { expected: ValueType::Integer, .. }));

        let err: FieldError = ValueError::invalid("bad").into();
        assert_eq!(err, FieldError::InvalidTypedValue("bad".into()));
    }

    #[test]
    fn retryable_kinds() {
        assert!(FieldError::Evaluation("timeout".into()).is_retryable());
        assert!(FieldError::persistence("disk full").is_retryable());
        assert!(!FieldError::key_conflict("a").is_retryable());
    }
}

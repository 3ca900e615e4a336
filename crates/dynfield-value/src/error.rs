//! Error types for typed values
//!
//! Coercion of user literals and interpreter output can fail in two ways:
//! - the text/JSON cannot be turned into the declared type (`TypeMismatch`)
//! - the assembled value breaks one of the typed-value invariants (`InvalidTypedValue`)

use crate::value_type::ValueType;

/// Errors raised while coercing or validating typed values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// Literal or JSON input cannot be coerced to the declared type
    #[error("cannot coerce {literal:?} to {expected}")]
    TypeMismatch {
        /// Declared type of the target field
        expected: ValueType,
        /// Offending input, rendered as text
        literal: String,
    },

    /// Typed value violates a structural invariant
    #[error("invalid typed value: {0}")]
    InvalidTypedValue(String),

    /// Type tag outside the closed type set
    #[error("unknown value type: '{0}'")]
    UnknownType(String),
}

impl ValueError {
    /// Create a coercion failure for `expected`
    pub fn mismatch(expected: ValueType, literal: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected,
            literal: literal.into(),
        }
    }

    /// Create an invariant violation
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidTypedValue(message.into())
    }
}

/// Result type alias for value operations
pub type ValueResult<T> = Result<T, ValueError>;

//! Controller errors

use crate::state::ControllerState;
use dynfield_store::FieldError;

/// Errors raised by [`crate::DynamicFieldController`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// Operation not valid in the current state
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        /// State the controller was in
        from: ControllerState,
        /// State the operation needed
        to: ControllerState,
    },

    /// Evaluation requested on a static draft
    #[error("draft is static; only expressions can be evaluated")]
    NotDynamic,

    /// Store or evaluation failure
    #[error(transparent)]
    Field(#[from] FieldError),
}

impl ControllerError {
    /// Underlying field error, if any
    #[must_use]
    pub fn as_field(&self) -> Option<&FieldError> {
        match self {
            Self::Field(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

//! Controller states and the transitions between them
//!
//! ```text
//! Viewing -> Editing -> Evaluating -> Editing
//!            Editing -> Saving -> Viewing | Editing
//!            Editing -> Cancelled -> Viewing
//! ```

use crate::error::ControllerError;
use std::fmt;

/// Lifecycle state of a field editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Showing the committed value
    Viewing,
    /// Holding a local draft
    Editing,
    /// Previewing the draft expression
    Evaluating,
    /// Committing the draft
    Saving,
    /// Draft discarded
    Cancelled,
}

impl ControllerState {
    /// Every state
    pub const ALL: [Self; 5] = [
        Self::Viewing,
        Self::Editing,
        Self::Evaluating,
        Self::Saving,
        Self::Cancelled,
    ];

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Viewing => "viewing",
            Self::Editing => "editing",
            Self::Evaluating => "evaluating",
            Self::Saving => "saving",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ControllerState) -> Vec<ControllerState> {
    use ControllerState::{Cancelled, Editing, Evaluating, Saving, Viewing};
    match from {
        Viewing => vec![Editing],
        Editing => vec![Evaluating, Saving, Cancelled],
        Evaluating => vec![Editing],
        Saving => vec![Viewing, Editing],
        Cancelled => vec![Viewing],
    }
}

/// Check a single transition
///
/// # Errors
/// `IllegalTransition` when `to` is not reachable from `from`
pub fn validate_transition(from: ControllerState, to: ControllerState) -> Result<(), ControllerError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ControllerError::IllegalTransition { from, to })
    }
}

//! Dynfield Controller
//!
//! Client-side lifecycle of a single field being edited.
//!
//! # Overview
//!
//! - **ControllerState**: `Viewing`, `Editing`, `Evaluating`, `Saving`, `Cancelled`
//! - **DynamicFieldController**: draft handling, previews, commits and cancel
//!
//! Controllers are plain values owned by the caller; open one per field
//! being edited and drop it when done.
//!
//! # Example
//!
//! ```rust,ignore
//! use dynfield_controller::prelude::*;
//!
//! let mut editor = DynamicFieldController::open(client, "sum", "value")?;
//! editor.begin_edit()?;
//! editor.edit_draft("(+ 1 2 3)")?;
//! let preview = editor.evaluate().await?;
//! editor.save().await?;
//! ```

#![warn(unreachable_pub)]

pub mod controller;
pub mod error;
pub mod state;

// Re-exports
pub use controller::{Draft, DynamicFieldController};
pub use error::{ControllerError, ControllerResult};
pub use state::{allowed_transitions, validate_transition, ControllerState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for editing fields
    pub use crate::{ControllerError, ControllerResult, ControllerState, Draft, DynamicFieldController};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Dynfield Store
//!
//! Config entries and variables, each a map from key to typed fields, kept
//! in sync with a persistence backend.
//!
//! - Generic [`FieldStore`] over an entity-kind policy ([`ConfigKind`], [`VariableKind`])
//! - Stage, persist, roll back on backend failure
//! - Per-field version tokens discarding stale evaluation results
//! - [`KeyRenameCoordinator`] for identity-preserving renames
//! - [`MemoryBackend`] implementing the whole [`FieldBackend`] boundary
//!
//! # Example
//!
//! ```rust
//! use dynfield_store::prelude::*;
//! use dynfield_value::{TypedValue, Value, ValueType};
//! use std::sync::Arc;
//!
//! # async fn example() -> FieldResult<()> {
//! let store: FieldStore<ConfigKind> = FieldStore::new(Arc::new(MemoryBackend::new()));
//! let retries = TypedValue::from_literal(ValueType::Integer, "3")?;
//! store.create_entity("retries", Entity::new(retries)).await?;
//!
//! let field = store.set_static_value("retries", "value", "5").await?;
//! assert_eq!(field.value.value(), &Value::Integer(5));
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod backend;
pub mod entity;
pub mod error;
pub mod kind;
pub mod memory;
pub mod rename;
pub mod store;

// Re-exports
pub use backend::{FieldBackend, HistoryFilter};
pub use entity::{Entity, Field};
pub use error::{FieldError, FieldResult};
pub use kind::{ComponentKind, ConfigKind, EntityKind, VariableKind, PRIMARY_FIELD};
pub use memory::{HistoryEntry, MemoryBackend, StoreDocument};
pub use rename::KeyRenameCoordinator;
pub use store::{ApplyOutcome, DiscardReason, EvaluationTicket, FieldStore};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with field stores
    pub use crate::{
        ApplyOutcome, ConfigKind, Entity, Field, FieldBackend, FieldError, FieldResult, FieldStore,
        HistoryFilter, KeyRenameCoordinator, MemoryBackend, VariableKind,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

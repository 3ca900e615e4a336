//! Key renames
//!
//! A rename is a pure identity change: every field keeps its value,
//! expression, stale flag, version and history. Nothing is re-evaluated and
//! expression text is never rewritten.

use crate::error::{FieldError, FieldResult};
use crate::kind::EntityKind;
use crate::store::FieldStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Renames keys of one store
#[derive(Debug)]
pub struct KeyRenameCoordinator<K: EntityKind> {
    store: Arc<FieldStore<K>>,
}

impl<K: EntityKind> Clone for KeyRenameCoordinator<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<K: EntityKind> KeyRenameCoordinator<K> {
    /// Coordinator over `store`
    #[inline]
    #[must_use]
    pub fn new(store: Arc<FieldStore<K>>) -> Self {
        Self { store }
    }

    /// Store being renamed in
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<FieldStore<K>> {
        &self.store
    }

    /// Move `old_key` with all its fields and history to `new_key`
    ///
    /// Renaming a key to itself succeeds without touching anything.
    /// Evaluations issued under `old_key` are discarded when they resolve.
    ///
    /// # Errors
    /// - `NotFound` when `old_key` is absent
    /// - `Conflict` when `new_key` exists
    /// - `InvalidOperation` when `new_key` is blank
    /// - `Persistence` when the backend rejects the rename (entity moved back)
    pub async fn rename(&self, old_key: &str, new_key: &str) -> FieldResult<()> {
        if old_key == new_key {
            return if self.store.contains(old_key) {
                Ok(())
            } else {
                Err(FieldError::key_not_found(old_key))
            };
        }
        if new_key.trim().is_empty() {
            return Err(FieldError::InvalidOperation("entity key must not be blank".into()));
        }

        self.store.move_entity(old_key, new_key)?;

        let kind = self.store.kind();
        if let Err(err) = self.store.backend().persist_rename(kind, old_key, new_key).await {
            if !self.store.unmove_entity(old_key, new_key) {
                warn!(%kind, old_key, new_key, "entity changed during rename; not moved back");
            }
            warn!(%kind, old_key, new_key, error = %err, "rename rolled back");
            return Err(err);
        }

        info!(%kind, old_key, new_key, "renamed entity");
        Ok(())
    }
}

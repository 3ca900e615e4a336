//! Fault-injecting backend

use dynfield_store::{ComponentKind, Entity, FieldBackend, FieldError, FieldResult, HistoryFilter, MemoryBackend};
use dynfield_value::{EvaluationRecord, TypedValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// [`MemoryBackend`] whose writes can be made to fail
///
/// Reads always succeed. While failing, every write returns
/// `Persistence("injected failure: <operation>")` and leaves the inner
/// backend untouched.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: Arc<MemoryBackend>,
    failing: AtomicBool,
    fail_after: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend over an existing memory backend
    pub fn wrapping(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Memory backend holding what was actually persisted
    pub fn inner(&self) -> &Arc<MemoryBackend> {
        &self.inner
    }

    /// Fail every write from now on (or stop failing)
    pub fn set_failing(&self, failing: bool) {
        self.fail_after.store(0, Ordering::SeqCst);
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Let `count` more writes through, then fail the rest
    pub fn fail_after(&self, count: usize) {
        self.fail_after.store(count, Ordering::SeqCst);
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Writes attempted so far, failed ones included
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str) -> FieldResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if !self.failing.load(Ordering::SeqCst) {
            return Ok(());
        }
        let allowed = self
            .fail_after
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if allowed {
            Ok(())
        } else {
            Err(FieldError::persistence(format!("injected failure: {operation}")))
        }
    }
}

#[async_trait::async_trait]
impl FieldBackend for FlakyBackend {
    async fn load_entities(&self, kind: ComponentKind) -> FieldResult<BTreeMap<String, Entity>> {
        self.inner.load_entities(kind).await
    }

    async fn persist_create(&self, kind: ComponentKind, key: &str, entity: &Entity) -> FieldResult<()> {
        self.check("persist_create")?;
        self.inner.persist_create(kind, key, entity).await
    }

    async fn persist_static_update(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()> {
        self.check("persist_static_update")?;
        self.inner.persist_static_update(kind, key, field_name, value).await
    }

    async fn persist_dynamic_update(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        expression: &str,
    ) -> FieldResult<()> {
        self.check("persist_dynamic_update")?;
        self.inner.persist_dynamic_update(kind, key, field_name, expression).await
    }

    async fn persist_mode_switch(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()> {
        self.check("persist_mode_switch")?;
        self.inner.persist_mode_switch(kind, key, field_name, value).await
    }

    async fn persist_field_create(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()> {
        self.check("persist_field_create")?;
        self.inner.persist_field_create(kind, key, field_name, value).await
    }

    async fn persist_field_delete(&self, kind: ComponentKind, key: &str, field_name: &str) -> FieldResult<()> {
        self.check("persist_field_delete")?;
        self.inner.persist_field_delete(kind, key, field_name).await
    }

    async fn persist_delete(&self, kind: ComponentKind, key: &str) -> FieldResult<()> {
        self.check("persist_delete")?;
        self.inner.persist_delete(kind, key).await
    }

    async fn persist_rename(&self, kind: ComponentKind, old_key: &str, new_key: &str) -> FieldResult<()> {
        self.check("persist_rename")?;
        self.inner.persist_rename(kind, old_key, new_key).await
    }

    async fn persist_evaluation(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        record: &EvaluationRecord,
    ) -> FieldResult<()> {
        self.check("persist_evaluation")?;
        self.inner.persist_evaluation(kind, key, field_name, record).await
    }

    async fn fetch_history(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
    ) -> FieldResult<Vec<EvaluationRecord>> {
        self.inner.fetch_history(kind, key, field_name).await
    }

    async fn clear_history(&self, filter: &HistoryFilter) -> FieldResult<usize> {
        self.check("clear_history")?;
        self.inner.clear_history(filter).await
    }
}

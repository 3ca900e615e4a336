//! In-memory backend
//!
//! Implements the whole persistence boundary over a [`StoreDocument`],
//! which also serves as the on-disk format of the command line tool.

use crate::backend::{FieldBackend, HistoryFilter};
use crate::entity::Entity;
use crate::error::{FieldError, FieldResult};
use crate::kind::{ComponentKind, PRIMARY_FIELD};
use dynfield_value::{EvaluationRecord, TypedValue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serializable state of both entity kinds plus all history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Config entries by key
    #[serde(default)]
    pub config: BTreeMap<String, Entity>,
    /// Variables by key
    #[serde(default)]
    pub variables: BTreeMap<String, Entity>,
    /// Evaluation history of every field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

/// One history record with its owning field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Component type
    pub component: ComponentKind,
    /// Entity key
    pub key: String,
    /// Field name
    pub field_name: String,
    /// The record itself
    pub record: EvaluationRecord,
}

impl StoreDocument {
    /// Entities of one kind
    #[must_use]
    pub fn entities(&self, kind: ComponentKind) -> &BTreeMap<String, Entity> {
        match kind {
            ComponentKind::Config => &self.config,
            ComponentKind::Variable => &self.variables,
        }
    }

    fn entities_mut(&mut self, kind: ComponentKind) -> &mut BTreeMap<String, Entity> {
        match kind {
            ComponentKind::Config => &mut self.config,
            ComponentKind::Variable => &mut self.variables,
        }
    }

    fn field_mut(&mut self, kind: ComponentKind, key: &str, field_name: &str) -> FieldResult<&mut TypedValue> {
        self.entities_mut(kind)
            .get_mut(key)
            .ok_or_else(|| FieldError::persistence(format!("no {kind} entity '{key}'")))?
            .field_mut(field_name)
            .ok_or_else(|| FieldError::persistence(format!("no field '{key}.{field_name}' in {kind}")))
    }
}

/// Backend keeping everything in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: Mutex<StoreDocument>,
}

impl MemoryBackend {
    /// Empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend seeded with `document`
    #[inline]
    #[must_use]
    pub fn from_document(document: StoreDocument) -> Self {
        Self {
            document: Mutex::new(document),
        }
    }

    /// Copy of the current state
    #[must_use]
    pub fn document(&self) -> StoreDocument {
        self.document.lock().clone()
    }

    /// Number of stored history records
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.document.lock().history.len()
    }
}

#[async_trait::async_trait]
impl FieldBackend for MemoryBackend {
    async fn load_entities(&self, kind: ComponentKind) -> FieldResult<BTreeMap<String, Entity>> {
        Ok(self.document.lock().entities(kind).clone())
    }

    async fn persist_create(&self, kind: ComponentKind, key: &str, entity: &Entity) -> FieldResult<()> {
        let mut doc = self.document.lock();
        let entities = doc.entities_mut(kind);
        if entities.contains_key(key) {
            return Err(FieldError::persistence(format!("{kind} entity '{key}' already stored")));
        }
        entities.insert(key.to_string(), entity.clone());
        Ok(())
    }

    async fn persist_static_update(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()> {
        *self.document.lock().field_mut(kind, key, field_name)? = value.clone();
        Ok(())
    }

    async fn persist_dynamic_update(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        expression: &str,
    ) -> FieldResult<()> {
        let mut doc = self.document.lock();
        let field = doc.field_mut(kind, key, field_name)?;
        *field = field.with_expression(expression)?;
        Ok(())
    }

    async fn persist_mode_switch(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()> {
        *self.document.lock().field_mut(kind, key, field_name)? = value.clone();
        Ok(())
    }

    async fn persist_field_create(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()> {
        let mut doc = self.document.lock();
        let entity = doc
            .entities_mut(kind)
            .get_mut(key)
            .ok_or_else(|| FieldError::persistence(format!("no {kind} entity '{key}'")))?;
        if entity.field(field_name).is_some() {
            return Err(FieldError::persistence(format!("field '{key}.{field_name}' already stored")));
        }
        entity.dynamic_fields.insert(field_name.to_string(), value.clone());
        Ok(())
    }

    async fn persist_field_delete(&self, kind: ComponentKind, key: &str, field_name: &str) -> FieldResult<()> {
        if field_name == PRIMARY_FIELD {
            return Err(FieldError::persistence("primary field cannot be deleted"));
        }
        let mut doc = self.document.lock();
        doc.entities_mut(kind)
            .get_mut(key)
            .and_then(|e| e.dynamic_fields.remove(field_name))
            .ok_or_else(|| FieldError::persistence(format!("no field '{key}.{field_name}' in {kind}")))?;
        doc.history
            .retain(|h| !(h.component == kind && h.key == key && h.field_name == field_name));
        Ok(())
    }

    async fn persist_delete(&self, kind: ComponentKind, key: &str) -> FieldResult<()> {
        let mut doc = self.document.lock();
        doc.entities_mut(kind)
            .remove(key)
            .ok_or_else(|| FieldError::persistence(format!("no {kind} entity '{key}'")))?;
        doc.history.retain(|h| !(h.component == kind && h.key == key));
        Ok(())
    }

    async fn persist_rename(&self, kind: ComponentKind, old_key: &str, new_key: &str) -> FieldResult<()> {
        let mut doc = self.document.lock();
        let entities = doc.entities_mut(kind);
        if entities.contains_key(new_key) {
            return Err(FieldError::persistence(format!("{kind} entity '{new_key}' already stored")));
        }
        let entity = entities
            .remove(old_key)
            .ok_or_else(|| FieldError::persistence(format!("no {kind} entity '{old_key}'")))?;
        entities.insert(new_key.to_string(), entity);
        for entry in doc
            .history
            .iter_mut()
            .filter(|h| h.component == kind && h.key == old_key)
        {
            entry.key = new_key.to_string();
        }
        Ok(())
    }

    async fn persist_evaluation(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        record: &EvaluationRecord,
    ) -> FieldResult<()> {
        let mut doc = self.document.lock();
        *doc.field_mut(kind, key, field_name)? = record.value.clone();
        doc.history.push(HistoryEntry {
            component: kind,
            key: key.to_string(),
            field_name: field_name.to_string(),
            record: record.clone(),
        });
        Ok(())
    }

    async fn fetch_history(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
    ) -> FieldResult<Vec<EvaluationRecord>> {
        let doc = self.document.lock();
        let mut records: Vec<_> = doc
            .history
            .iter()
            .filter(|h| h.component == kind && h.key == key && h.field_name == field_name)
            .map(|h| h.record.clone())
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn clear_history(&self, filter: &HistoryFilter) -> FieldResult<usize> {
        let mut doc = self.document.lock();
        let before = doc.history.len();
        doc.history.retain(|h| {
            !(filter.matches_field(h.component, &h.key, &h.field_name) && filter.matches_record(&h.record))
        });
        Ok(before - doc.history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynfield_value::ValueType;
    use pretty_assertions::assert_eq;

    fn dynamic_entity() -> Entity {
        Entity::new(TypedValue::new_dynamic(ValueType::Integer, "(+ 1 2)").unwrap())
    }

    fn evaluated(n: i64) -> EvaluationRecord {
        let value = TypedValue::new_dynamic(ValueType::Integer, "(+ 1 2)")
            .unwrap()
            .evaluated("(+ 1 2)", ValueType::Integer, &serde_json::json!(n))
            .unwrap();
        EvaluationRecord::now(value)
    }

    #[tokio::test]
    async fn rename_moves_history() {
        let backend = MemoryBackend::new();
        backend
            .persist_create(ComponentKind::Variable, "old", &dynamic_entity())
            .await
            .unwrap();
        backend
            .persist_evaluation(ComponentKind::Variable, "old", "value", &evaluated(3))
            .await
            .unwrap();

        backend
            .persist_rename(ComponentKind::Variable, "old", "new")
            .await
            .unwrap();

        let moved = backend
            .fetch_history(ComponentKind::Variable, "new", "value")
            .await
            .unwrap();
        assert_eq!(moved.len(), 1);
        assert!(backend
            .fetch_history(ComponentKind::Variable, "old", "value")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn clear_history_counts_removed() {
        let backend = MemoryBackend::new();
        backend
            .persist_create(ComponentKind::Config, "a", &dynamic_entity())
            .await
            .unwrap();
        backend
            .persist_create(ComponentKind::Variable, "a", &dynamic_entity())
            .await
            .unwrap();
        for n in 0..3 {
            backend
                .persist_evaluation(ComponentKind::Config, "a", "value", &evaluated(n))
                .await
                .unwrap();
        }
        backend
            .persist_evaluation(ComponentKind::Variable, "a", "value", &evaluated(9))
            .await
            .unwrap();

        let removed = backend
            .clear_history(&HistoryFilter::all().component(ComponentKind::Config))
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(backend.history_len(), 1);
    }

    #[tokio::test]
    async fn dynamic_update_keeps_value() {
        let backend = MemoryBackend::new();
        let entity = Entity::new(TypedValue::from_literal(ValueType::Integer, "4").unwrap());
        backend
            .persist_create(ComponentKind::Config, "n", &entity)
            .await
            .unwrap();
        backend
            .persist_dynamic_update(ComponentKind::Config, "n", "value", "(* 2 2)")
            .await
            .unwrap();

        let doc = backend.document();
        let stored = &doc.config["n"].value;
        assert!(stored.is_dynamic());
        assert_eq!(stored.to_literal(), "4");
    }

    #[test]
    fn document_serde_round_trip() {
        let mut doc = StoreDocument::default();
        doc.config.insert("retries".into(), Entity::new(TypedValue::from_literal(ValueType::Integer, "3").unwrap()));
        let text = serde_json::to_string(&doc).unwrap();
        let back: StoreDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(back, doc);
    }
}

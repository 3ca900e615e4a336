//! Persistence boundary
//!
//! The store owns the in-memory view; everything durable goes through
//! [`FieldBackend`]. Every call may fail with `FieldError::Persistence`,
//! after which the store rolls back the local change it staged.

use crate::entity::Entity;
use crate::error::FieldResult;
use crate::kind::ComponentKind;
use chrono::{DateTime, Utc};
use dynfield_value::{EvaluationRecord, TypedValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Durable storage for entities and evaluation history
#[async_trait::async_trait]
pub trait FieldBackend: Debug + Send + Sync {
    /// Every entity of `kind`, keyed by entity key
    async fn load_entities(&self, kind: ComponentKind) -> FieldResult<BTreeMap<String, Entity>>;

    /// Store a new entity
    async fn persist_create(&self, kind: ComponentKind, key: &str, entity: &Entity) -> FieldResult<()>;

    /// Store a new literal value of a static field
    async fn persist_static_update(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()>;

    /// Store a new expression; the stored value is left as is
    async fn persist_dynamic_update(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        expression: &str,
    ) -> FieldResult<()>;

    /// Replace a field wholesale after a static/dynamic mode switch
    async fn persist_mode_switch(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()>;

    /// Store a new auxiliary field
    async fn persist_field_create(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        value: &TypedValue,
    ) -> FieldResult<()>;

    /// Remove an auxiliary field
    async fn persist_field_delete(&self, kind: ComponentKind, key: &str, field_name: &str) -> FieldResult<()>;

    /// Remove an entity and its history
    async fn persist_delete(&self, kind: ComponentKind, key: &str) -> FieldResult<()>;

    /// Move an entity and its history to a new key
    async fn persist_rename(&self, kind: ComponentKind, old_key: &str, new_key: &str) -> FieldResult<()>;

    /// Store an evaluated value and append its history record
    async fn persist_evaluation(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
        record: &EvaluationRecord,
    ) -> FieldResult<()>;

    /// History of one field, ascending by timestamp
    async fn fetch_history(
        &self,
        kind: ComponentKind,
        key: &str,
        field_name: &str,
    ) -> FieldResult<Vec<EvaluationRecord>>;

    /// Remove matching history records, returning how many were removed
    async fn clear_history(&self, filter: &HistoryFilter) -> FieldResult<usize>;
}

/// Selects history records to clear
///
/// Unset criteria match everything; an empty filter clears all history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Component type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentKind>,
    /// Entity key (component label)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Field name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    /// Only records strictly older than this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    /// Filter matching every record
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one component type
    #[inline]
    #[must_use]
    pub fn component(mut self, kind: ComponentKind) -> Self {
        self.component = Some(kind);
        self
    }

    /// Restrict to one entity key
    #[inline]
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Restrict to one field name
    #[inline]
    #[must_use]
    pub fn field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    /// Restrict to records older than `cutoff`
    #[inline]
    #[must_use]
    pub fn before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.before = Some(cutoff);
        self
    }

    /// Whether the history of `(kind, key, field_name)` is in scope
    #[must_use]
    pub fn matches_field(&self, kind: ComponentKind, key: &str, field_name: &str) -> bool {
        self.component.map_or(true, |c| c == kind)
            && self.key.as_deref().map_or(true, |k| k == key)
            && self.field_name.as_deref().map_or(true, |f| f == field_name)
    }

    /// Whether `record` falls before the cutoff
    #[must_use]
    pub fn matches_record(&self, record: &EvaluationRecord) -> bool {
        self.before.map_or(true, |cutoff| record.timestamp < cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dynfield_value::ValueType;

    fn record_at(hour: u32) -> EvaluationRecord {
        let value = TypedValue::new_dynamic(ValueType::Integer, "(+ 1 2)").unwrap();
        EvaluationRecord::at(Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(), value)
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = HistoryFilter::all();
        assert!(filter.matches_field(ComponentKind::Config, "a", "value"));
        assert!(filter.matches_record(&record_at(5)));
    }

    #[test]
    fn criteria_combine() {
        let filter = HistoryFilter::all()
            .component(ComponentKind::Variable)
            .key("weather")
            .field("forecast");
        assert!(filter.matches_field(ComponentKind::Variable, "weather", "forecast"));
        assert!(!filter.matches_field(ComponentKind::Config, "weather", "forecast"));
        assert!(!filter.matches_field(ComponentKind::Variable, "weather", "value"));
    }

    #[test]
    fn before_is_exclusive() {
        let filter = HistoryFilter::all().before(Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap());
        assert!(filter.matches_record(&record_at(4)));
        assert!(!filter.matches_record(&record_at(5)));
    }
}

//! Entity snapshots and field views

use crate::kind::PRIMARY_FIELD;
use dynfield_value::TypedValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of one entity: its primary field plus auxiliary fields
///
/// Config entries always have an empty `dynamic_fields` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Primary field
    pub value: TypedValue,
    /// Auxiliary fields by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dynamic_fields: BTreeMap<String, TypedValue>,
}

impl Entity {
    /// Entity with only a primary field
    #[inline]
    #[must_use]
    pub fn new(value: TypedValue) -> Self {
        Self {
            value,
            dynamic_fields: BTreeMap::new(),
        }
    }

    /// Add an auxiliary field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: TypedValue) -> Self {
        self.dynamic_fields.insert(name.into(), value);
        self
    }

    /// Field by name; [`PRIMARY_FIELD`] addresses the primary field
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&TypedValue> {
        if name == PRIMARY_FIELD {
            Some(&self.value)
        } else {
            self.dynamic_fields.get(name)
        }
    }

    /// Mutable field by name
    pub fn field_mut(&mut self, name: &str) -> Option<&mut TypedValue> {
        if name == PRIMARY_FIELD {
            Some(&mut self.value)
        } else {
            self.dynamic_fields.get_mut(name)
        }
    }

    /// All fields, primary first
    pub fn fields(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        std::iter::once((PRIMARY_FIELD, &self.value))
            .chain(self.dynamic_fields.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

/// One field as seen by a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Owning entity key
    pub key: String,
    /// Field name within the entity
    pub field_name: String,
    /// Committed value
    pub value: TypedValue,
    /// Set when the expression changed since the value was last evaluated
    pub stale: bool,
}

impl Field {
    /// Whether the field is primary
    #[inline]
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.field_name == PRIMARY_FIELD
    }
}

//! Evaluation history records

use crate::typed_value::TypedValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of one evaluation of a dynamic field
///
/// The stored value keeps the expression it was computed from, so a
/// history survives later edits of the field's source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// When the evaluation completed
    pub timestamp: DateTime<Utc>,
    /// Evaluated value, including its source expression
    pub value: TypedValue,
}

impl EvaluationRecord {
    /// Record `value` as evaluated now
    #[inline]
    #[must_use]
    pub fn now(value: TypedValue) -> Self {
        Self::at(Utc::now(), value)
    }

    /// Record `value` as evaluated at `timestamp`
    #[inline]
    #[must_use]
    pub fn at(timestamp: DateTime<Utc>, value: TypedValue) -> Self {
        Self { timestamp, value }
    }

    /// Expression the value was computed from
    #[inline]
    #[must_use]
    pub fn expression(&self) -> Option<&str> {
        self.value.original()
    }
}

//! Entity-kind policies
//!
//! Config entries and variables share field semantics and differ only in
//! how many fields an entity may hold. [`crate::FieldStore`] is generic
//! over these markers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the field every entity has
pub const PRIMARY_FIELD: &str = "value";

/// Component type tag used on the persistence boundary and in history filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Config entries: primary field only
    Config,
    /// Variables: primary field plus named auxiliary fields
    Variable,
}

impl ComponentKind {
    /// Lowercase tag
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Variable => "variable",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-cardinality policy of an entity kind
pub trait EntityKind: fmt::Debug + Send + Sync + 'static {
    /// Tag reported to the backend
    const COMPONENT: ComponentKind;

    /// Whether entities may carry fields besides [`PRIMARY_FIELD`]
    const ALLOWS_AUXILIARY: bool;
}

/// Config entries: exactly one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigKind;

impl EntityKind for ConfigKind {
    const COMPONENT: ComponentKind = ComponentKind::Config;
    const ALLOWS_AUXILIARY: bool = false;
}

/// Variables: primary field plus any number of named dynamic fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VariableKind;

impl EntityKind for VariableKind {
    const COMPONENT: ComponentKind = ComponentKind::Variable;
    const ALLOWS_AUXILIARY: bool = true;
}

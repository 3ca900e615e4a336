//! The closed set of field types

use crate::error::ValueError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared type of a field
///
/// Serialized as its lowercase tag (`"integer"`, `"timerange"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Free text
    String,
    /// Signed 64-bit integer
    Integer,
    /// Finite floating point number
    Decimal,
    /// `true` / `false`
    Boolean,
    /// UTC instant
    Timestamp,
    /// Signed duration in whole seconds
    Timelength,
    /// Closed interval between two instants
    Timerange,
    /// Ordered sequence, optionally homogeneous
    List,
    /// String-keyed mapping
    Dict,
    /// Source text, kept verbatim
    Code,
    /// One of a fixed set of choices
    Enum,
}

impl ValueType {
    /// Every type tag, in declaration order
    pub const ALL: [ValueType; 11] = [
        ValueType::String,
        ValueType::Integer,
        ValueType::Decimal,
        ValueType::Boolean,
        ValueType::Timestamp,
        ValueType::Timelength,
        ValueType::Timerange,
        ValueType::List,
        ValueType::Dict,
        ValueType::Code,
        ValueType::Enum,
    ];

    /// Lowercase tag used on the wire
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Timelength => "timelength",
            Self::Timerange => "timerange",
            Self::List => "list",
            Self::Dict => "dict",
            Self::Code => "code",
            Self::Enum => "enum",
        }
    }

    /// Whether values of this type are nested structures
    #[inline]
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::List | Self::Dict)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == tag)
            .ok_or_else(|| ValueError::UnknownType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_back() {
        for t in ValueType::ALL {
            assert_eq!(t.as_str().parse::<ValueType>().unwrap(), t);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Integer".parse::<ValueType>().unwrap(), ValueType::Integer);
        assert!("money".parse::<ValueType>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_tag() {
        let json = serde_json::to_string(&ValueType::Timelength).unwrap();
        assert_eq!(json, "\"timelength\"");
    }
}

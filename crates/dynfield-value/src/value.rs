//! Runtime representation of field values
//!
//! One variant per [`ValueType`] tag. Coercion goes through exactly two
//! entry points:
//! - [`Value::parse_literal`]: user-entered text
//! - [`Value::from_json`]: interpreter output and persisted documents

use crate::error::{ValueError, ValueResult};
use crate::time::{format_timestamp, parse_timestamp, TimeLength, TimeRange};
use crate::value_type::ValueType;
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;

/// Materialized value of a field
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Free text
    String(String),
    /// Signed integer
    Integer(i64),
    /// Finite float
    Decimal(f64),
    /// Boolean flag
    Boolean(bool),
    /// UTC instant
    Timestamp(DateTime<Utc>),
    /// Duration in seconds
    Timelength(TimeLength),
    /// Interval between two instants
    Timerange(TimeRange),
    /// Ordered sequence
    List(Vec<Value>),
    /// String-keyed mapping
    Dict(BTreeMap<String, Value>),
    /// Verbatim source text
    Code(String),
    /// Selected choice of an enum field
    Enum(String),
}

impl Value {
    /// Type tag of this value
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Integer(_) => ValueType::Integer,
            Self::Decimal(_) => ValueType::Decimal,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Timestamp(_) => ValueType::Timestamp,
            Self::Timelength(_) => ValueType::Timelength,
            Self::Timerange(_) => ValueType::Timerange,
            Self::List(_) => ValueType::List,
            Self::Dict(_) => ValueType::Dict,
            Self::Code(_) => ValueType::Code,
            Self::Enum(_) => ValueType::Enum,
        }
    }

    /// Zero value for `kind`, used as the placeholder of unevaluated dynamic fields
    ///
    /// Enum placeholders pick the first choice (or the empty string when none exist).
    #[must_use]
    pub fn zero(kind: ValueType, enum_choices: Option<&[String]>) -> Self {
        match kind {
            ValueType::String => Self::String(String::new()),
            ValueType::Integer => Self::Integer(0),
            ValueType::Decimal => Self::Decimal(0.0),
            ValueType::Boolean => Self::Boolean(false),
            ValueType::Timestamp => Self::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
            ValueType::Timelength => Self::Timelength(TimeLength::default()),
            ValueType::Timerange => Self::Timerange(TimeRange::instant(DateTime::<Utc>::UNIX_EPOCH)),
            ValueType::List => Self::List(Vec::new()),
            ValueType::Dict => Self::Dict(BTreeMap::new()),
            ValueType::Code => Self::Code(String::new()),
            ValueType::Enum => Self::Enum(
                enum_choices
                    .and_then(|c| c.first().cloned())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Whether this value has the runtime shape of `kind`
    ///
    /// For lists with a declared `item_type`, every element must carry that tag.
    #[must_use]
    pub fn conforms_to(&self, kind: ValueType, item_type: Option<ValueType>) -> bool {
        if self.value_type() != kind {
            return false;
        }
        match (self, item_type) {
            (Self::List(items), Some(item)) => items.iter().all(|v| v.value_type() == item),
            _ => true,
        }
    }

    /// Coerce user-entered text into `kind`
    ///
    /// Lists and dicts are written as JSON. Enum membership is checked by
    /// [`crate::TypedValue::validate`], not here.
    ///
    /// # Errors
    /// `ValueError::TypeMismatch` when the text has no reading as `kind`
    pub fn parse_literal(
        kind: ValueType,
        literal: &str,
        item_type: Option<ValueType>,
    ) -> ValueResult<Self> {
        let mismatch = || ValueError::mismatch(kind, literal);
        let trimmed = literal.trim();

        match kind {
            ValueType::String => Ok(Self::String(literal.to_string())),
            ValueType::Code => Ok(Self::Code(literal.to_string())),
            ValueType::Enum => Ok(Self::Enum(trimmed.to_string())),
            ValueType::Integer => trimmed.parse().map(Self::Integer).map_err(|_| mismatch()),
            ValueType::Decimal => trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Self::Decimal)
                .ok_or_else(mismatch),
            ValueType::Boolean => parse_bool(trimmed).map(Self::Boolean).ok_or_else(mismatch),
            ValueType::Timestamp => parse_timestamp(trimmed)
                .map(Self::Timestamp)
                .map_err(|_| mismatch()),
            ValueType::Timelength => trimmed
                .parse::<TimeLength>()
                .map(Self::Timelength)
                .map_err(|_| mismatch()),
            ValueType::Timerange => trimmed
                .parse::<TimeRange>()
                .map(Self::Timerange)
                .map_err(|_| mismatch()),
            ValueType::List | ValueType::Dict => {
                let json: JsonValue = serde_json::from_str(trimmed).map_err(|_| mismatch())?;
                Self::from_json(kind, &json, item_type)
            }
        }
    }

    /// Normalize a JSON value into `kind`
    ///
    /// Accepts the forms produced by [`Value::to_json`] plus a few lenient
    /// ones interpreters commonly emit (integral floats for integers, epoch
    /// seconds for timestamps, unit strings for time lengths).
    ///
    /// # Errors
    /// `ValueError::TypeMismatch` when the JSON has no reading as `kind`
    pub fn from_json(
        kind: ValueType,
        json: &JsonValue,
        item_type: Option<ValueType>,
    ) -> ValueResult<Self> {
        let mismatch = || ValueError::mismatch(kind, json.to_string());

        match kind {
            ValueType::String => json.as_str().map(|s| Self::String(s.to_string())).ok_or_else(mismatch),
            ValueType::Code => json.as_str().map(|s| Self::Code(s.to_string())).ok_or_else(mismatch),
            ValueType::Enum => json.as_str().map(|s| Self::Enum(s.to_string())).ok_or_else(mismatch),
            ValueType::Integer => json
                .as_i64()
                .or_else(|| integral_float(json))
                .map(Self::Integer)
                .ok_or_else(mismatch),
            ValueType::Decimal => json
                .as_f64()
                .filter(|f| f.is_finite())
                .map(Self::Decimal)
                .ok_or_else(mismatch),
            ValueType::Boolean => json.as_bool().map(Self::Boolean).ok_or_else(mismatch),
            ValueType::Timestamp => match json {
                JsonValue::String(s) => parse_timestamp(s).map(Self::Timestamp).map_err(|_| mismatch()),
                JsonValue::Number(n) => n
                    .as_i64()
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                    .map(Self::Timestamp)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ValueType::Timelength => match json {
                JsonValue::Number(n) => n
                    .as_i64()
                    .map(|secs| Self::Timelength(TimeLength::from_seconds(secs)))
                    .ok_or_else(mismatch),
                JsonValue::String(s) => s.parse().map(Self::Timelength).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ValueType::Timerange => match json {
                JsonValue::String(s) => s.parse().map(Self::Timerange).map_err(|_| mismatch()),
                JsonValue::Object(map) => {
                    let bound = |name: &str| {
                        map.get(name)
                            .and_then(JsonValue::as_str)
                            .and_then(|s| parse_timestamp(s).ok())
                    };
                    let (Some(start), Some(end)) = (bound("start"), bound("end")) else {
                        return Err(mismatch());
                    };
                    TimeRange::new(start, end).map(Self::Timerange).map_err(|_| mismatch())
                }
                _ => Err(mismatch()),
            },
            ValueType::List => {
                let items = json.as_array().ok_or_else(mismatch)?;
                items
                    .iter()
                    .map(|item| match item_type {
                        Some(t) => Self::from_json(t, item, None),
                        None => Self::infer(item),
                    })
                    .collect::<ValueResult<Vec<_>>>()
                    .map(Self::List)
            }
            ValueType::Dict => {
                let map = json.as_object().ok_or_else(mismatch)?;
                map.iter()
                    .map(|(k, v)| Self::infer(v).map(|v| (k.clone(), v)))
                    .collect::<ValueResult<BTreeMap<_, _>>>()
                    .map(Self::Dict)
            }
        }
    }

    /// Infer a value from untyped JSON (elements of untyped lists, dict entries)
    ///
    /// # Errors
    /// JSON `null` has no typed reading
    pub fn infer(json: &JsonValue) -> ValueResult<Self> {
        match json {
            JsonValue::Null => Err(ValueError::invalid("null has no typed representation")),
            JsonValue::Bool(b) => Ok(Self::Boolean(*b)),
            JsonValue::Number(n) => Ok(n
                .as_i64()
                .map_or_else(|| Self::Decimal(n.as_f64().unwrap_or_default()), Self::Integer)),
            JsonValue::String(s) => Ok(Self::String(s.clone())),
            JsonValue::Array(_) => Self::from_json(ValueType::List, json, None),
            JsonValue::Object(_) => Self::from_json(ValueType::Dict, json, None),
        }
    }

    /// Canonical JSON form
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::String(s) | Self::Code(s) | Self::Enum(s) => JsonValue::String(s.clone()),
            Self::Integer(i) => JsonValue::from(*i),
            Self::Decimal(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Self::Boolean(b) => JsonValue::Bool(*b),
            Self::Timestamp(ts) => JsonValue::String(format_timestamp(*ts)),
            Self::Timelength(len) => JsonValue::from(len.as_seconds()),
            Self::Timerange(range) => {
                let mut map = Map::new();
                map.insert("start".into(), JsonValue::String(format_timestamp(range.start())));
                map.insert("end".into(), JsonValue::String(format_timestamp(range.end())));
                JsonValue::Object(map)
            }
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Dict(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Text form accepted back by [`Value::parse_literal`]
    #[must_use]
    pub fn to_literal(&self) -> String {
        match self {
            Self::String(s) | Self::Code(s) | Self::Enum(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Timestamp(ts) => format_timestamp(*ts),
            Self::Timelength(len) => len.to_string(),
            Self::Timerange(range) => range.to_string(),
            Self::List(_) | Self::Dict(_) => self.to_json().to_string(),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral_float(json: &JsonValue) -> Option<i64> {
    json.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
        .map(|f| f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn integer_literal_coercion() {
        assert_eq!(
            Value::parse_literal(ValueType::Integer, " 5 ", None).unwrap(),
            Value::Integer(5)
        );
        assert!(matches!(
            Value::parse_literal(ValueType::Integer, "five", None),
            Err(ValueError::TypeMismatch { expected: ValueType::Integer, .. })
        ));
    }

    #[test]
    fn decimal_rejects_non_finite() {
        assert!(Value::parse_literal(ValueType::Decimal, "NaN", None).is_err());
        assert!(Value::parse_literal(ValueType::Decimal, "inf", None).is_err());
        assert_eq!(
            Value::parse_literal(ValueType::Decimal, "2.5", None).unwrap(),
            Value::Decimal(2.5)
        );
    }

    #[test]
    fn boolean_accepts_common_spellings() {
        for (text, expected) in [("TRUE", true), ("no", false), ("1", true), ("off", false)] {
            assert_eq!(
                Value::parse_literal(ValueType::Boolean, text, None).unwrap(),
                Value::Boolean(expected)
            );
        }
        assert!(Value::parse_literal(ValueType::Boolean, "maybe", None).is_err());
    }

    #[test]
    fn typed_list_literal_coerces_items() {
        let value = Value::parse_literal(ValueType::List, "[1, 2, 3]", Some(ValueType::Integer)).unwrap();
        assert_eq!(
            value,
            Value::List(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)])
        );

        let err = Value::parse_literal(ValueType::List, "[1, \"x\"]", Some(ValueType::Integer));
        assert!(err.is_err());
    }

    #[test]
    fn dict_literal_infers_entries() {
        let value = Value::parse_literal(ValueType::Dict, r#"{"a": 1, "b": [true]}"#, None).unwrap();
        let Value::Dict(map) = value else {
            panic!("expected dict");
        };
        assert_eq!(map["a"], Value::Integer(1));
        assert_eq!(map["b"], Value::List(vec![Value::Boolean(true)]));
    }

    #[test]
    fn integer_accepts_integral_float_json() {
        assert_eq!(
            Value::from_json(ValueType::Integer, &json!(3.0), None).unwrap(),
            Value::Integer(3)
        );
        assert!(Value::from_json(ValueType::Integer, &json!(3.5), None).is_err());
    }

    #[test]
    fn timestamp_from_epoch_seconds() {
        let value = Value::from_json(ValueType::Timestamp, &json!(86_400), None).unwrap();
        assert_eq!(
            value,
            Value::Timestamp(Utc.with_ymd_and_hms(1970, 1, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn timerange_json_object_form() {
        let json = json!({"start": "2024-03-01T00:00:00Z", "end": "2024-03-02T00:00:00Z"});
        let value = Value::from_json(ValueType::Timerange, &json, None).unwrap();
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn conforms_checks_item_type() {
        let list = Value::List(vec![Value::Integer(1), Value::String("x".into())]);
        assert!(list.conforms_to(ValueType::List, None));
        assert!(!list.conforms_to(ValueType::List, Some(ValueType::Integer)));
        assert!(!Value::Integer(1).conforms_to(ValueType::Decimal, None));
    }

    #[test]
    fn zero_values_conform() {
        let choices = vec!["low".to_string(), "high".to_string()];
        for kind in ValueType::ALL {
            let zero = Value::zero(kind, Some(&choices));
            assert!(zero.conforms_to(kind, None), "{kind} placeholder has wrong shape");
        }
        assert_eq!(Value::zero(ValueType::Enum, Some(&choices)), Value::Enum("low".into()));
    }
}

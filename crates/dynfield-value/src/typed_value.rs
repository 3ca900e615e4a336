//! Typed values: a materialized value plus its type tag and dynamic metadata

use crate::error::{ValueError, ValueResult};
use crate::value::Value;
use crate::value_type::ValueType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A field's current value together with its static/dynamic metadata
///
/// Every constructor and transition validates, so a `TypedValue` held by
/// a consumer always satisfies:
/// - dynamic values carry a non-empty source expression
/// - static values carry no expression
/// - the value's runtime shape matches the declared type
/// - enum values are one of the declared choices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTypedValue", into = "RawTypedValue")]
pub struct TypedValue {
    kind: ValueType,
    value: Value,
    is_dynamic: bool,
    original: Option<String>,
    enum_choices: Option<Vec<String>>,
    item_type: Option<ValueType>,
}

/// Wire form of a [`TypedValue`], with the value as plain JSON
///
/// Converting into a `TypedValue` coerces the JSON and validates the result.
/// A dynamic value with a `null` value takes its type's placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTypedValue {
    /// Declared type
    #[serde(rename = "type")]
    pub kind: ValueType,
    /// Value as JSON
    #[serde(default)]
    pub value: JsonValue,
    /// Whether the value comes from `original`
    #[serde(default)]
    pub is_dynamic: bool,
    /// Source expression of dynamic values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    /// Permitted choices of enum values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_choices: Option<Vec<String>>,
    /// Element type of list values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ValueType>,
}

impl TypedValue {
    /// Create a static value
    ///
    /// # Errors
    /// `InvalidTypedValue` when `value` does not have the shape of `kind`
    /// (enums need [`TypedValue::enumeration`], homogeneous lists [`TypedValue::list_of`])
    pub fn new_static(kind: ValueType, value: Value) -> ValueResult<Self> {
        Self {
            kind,
            value,
            is_dynamic: false,
            original: None,
            enum_choices: None,
            item_type: None,
        }
        .validated()
    }

    /// Create a static value by coercing user text
    ///
    /// # Errors
    /// `TypeMismatch` when `literal` cannot be read as `kind`
    pub fn from_literal(kind: ValueType, literal: &str) -> ValueResult<Self> {
        Self::new_static(kind, Value::parse_literal(kind, literal, None)?)
    }

    /// Create a static enum value
    ///
    /// # Errors
    /// `InvalidTypedValue` when `selected` is not among `choices`
    pub fn enumeration(choices: Vec<String>, selected: impl Into<String>) -> ValueResult<Self> {
        Self {
            kind: ValueType::Enum,
            value: Value::Enum(selected.into()),
            is_dynamic: false,
            original: None,
            enum_choices: Some(choices),
            item_type: None,
        }
        .validated()
    }

    /// Create a static list whose elements all have `item_type`
    ///
    /// # Errors
    /// `InvalidTypedValue` when an element has another type
    pub fn list_of(item_type: ValueType, items: Vec<Value>) -> ValueResult<Self> {
        Self {
            kind: ValueType::List,
            value: Value::List(items),
            is_dynamic: false,
            original: None,
            enum_choices: None,
            item_type: Some(item_type),
        }
        .validated()
    }

    /// Create a dynamic value that has not been evaluated yet
    ///
    /// The value is the placeholder for `kind` until an evaluation lands.
    ///
    /// # Errors
    /// `InvalidTypedValue` when `expression` is blank or `kind` is `enum`
    /// (dynamic enums are built from a [`RawTypedValue`] carrying choices)
    pub fn new_dynamic(kind: ValueType, expression: impl Into<String>) -> ValueResult<Self> {
        Self {
            kind,
            value: Value::zero(kind, None),
            is_dynamic: true,
            original: Some(expression.into()),
            enum_choices: None,
            item_type: None,
        }
        .validated()
    }

    /// Declared type
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ValueType {
        self.kind
    }

    /// Materialized value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether the value is computed from [`TypedValue::original`]
    #[inline]
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    /// Source expression of a dynamic value
    #[inline]
    #[must_use]
    pub fn original(&self) -> Option<&str> {
        self.original.as_deref()
    }

    /// Permitted enum choices
    #[inline]
    #[must_use]
    pub fn enum_choices(&self) -> Option<&[String]> {
        self.enum_choices.as_deref()
    }

    /// Declared element type of lists
    #[inline]
    #[must_use]
    pub fn item_type(&self) -> Option<ValueType> {
        self.item_type
    }

    /// Text form of the value, accepted back by [`TypedValue::with_literal`]
    #[inline]
    #[must_use]
    pub fn to_literal(&self) -> String {
        self.value.to_literal()
    }

    /// Check every typed-value invariant
    ///
    /// # Errors
    /// `InvalidTypedValue` naming the first violated rule
    pub fn validate(&self) -> ValueResult<()> {
        match (&self.original, self.is_dynamic) {
            (None, true) => return Err(ValueError::invalid("dynamic value has no expression")),
            (Some(expr), true) if expr.trim().is_empty() => {
                return Err(ValueError::invalid("dynamic value has an empty expression"));
            }
            (Some(_), false) => return Err(ValueError::invalid("static value carries an expression")),
            _ => {}
        }

        if self.enum_choices.is_some() && self.kind != ValueType::Enum {
            return Err(ValueError::invalid(format!(
                "enum choices declared on a {} value",
                self.kind
            )));
        }
        if self.item_type.is_some() && self.kind != ValueType::List {
            return Err(ValueError::invalid(format!(
                "item type declared on a {} value",
                self.kind
            )));
        }

        if self.value.value_type() != self.kind {
            return Err(ValueError::invalid(format!(
                "{} value stored in a {} field",
                self.value.value_type(),
                self.kind
            )));
        }

        if let (Value::List(items), Some(item_type)) = (&self.value, self.item_type) {
            if let Some(bad) = items.iter().find(|v| v.value_type() != item_type) {
                return Err(ValueError::invalid(format!(
                    "list of {item_type} contains a {} element",
                    bad.value_type()
                )));
            }
        }

        if let Value::Enum(selected) = &self.value {
            let choices = self
                .enum_choices
                .as_deref()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| ValueError::invalid("enum value has no choices"))?;
            if !choices.iter().any(|c| c == selected) {
                return Err(ValueError::invalid(format!(
                    "{selected:?} is not one of {choices:?}"
                )));
            }
        }

        Ok(())
    }

    /// Replace the value of a static field by coercing `literal`
    ///
    /// # Errors
    /// - `InvalidTypedValue` when the value is dynamic
    /// - `TypeMismatch` when `literal` cannot be read as the declared type
    pub fn with_literal(&self, literal: &str) -> ValueResult<Self> {
        if self.is_dynamic {
            return Err(ValueError::invalid("cannot write a literal into a dynamic value"));
        }
        self.coerced(literal)
    }

    /// Set the source expression, leaving the current value untouched
    ///
    /// # Errors
    /// `InvalidTypedValue` when `expression` is blank
    pub fn with_expression(&self, expression: &str) -> ValueResult<Self> {
        Self {
            is_dynamic: true,
            original: Some(expression.to_string()),
            ..self.clone()
        }
        .validated()
    }

    /// Switch to dynamic mode; the prior literal is discarded for the placeholder
    ///
    /// # Errors
    /// `InvalidTypedValue` when `expression` is blank
    pub fn into_dynamic(&self, expression: &str) -> ValueResult<Self> {
        Self {
            value: Value::zero(self.kind, self.enum_choices.as_deref()),
            is_dynamic: true,
            original: Some(expression.to_string()),
            ..self.clone()
        }
        .validated()
    }

    /// Switch to static mode with `literal`; the expression is discarded
    ///
    /// # Errors
    /// `TypeMismatch` when `literal` cannot be read as the declared type
    pub fn into_static(&self, literal: &str) -> ValueResult<Self> {
        self.coerced(literal)
    }

    /// Build the result of evaluating `expression` from interpreter output
    ///
    /// The reported type becomes the declared type. Enum choices and the
    /// list item type carry over only while the type stays the same.
    ///
    /// # Errors
    /// `TypeMismatch` when `json` has no reading as `kind`
    pub fn evaluated(&self, expression: &str, kind: ValueType, json: &JsonValue) -> ValueResult<Self> {
        let same_kind = kind == self.kind;
        let item_type = self.item_type.filter(|_| same_kind);
        Self {
            kind,
            value: Value::from_json(kind, json, item_type)?,
            is_dynamic: true,
            original: Some(expression.to_string()),
            enum_choices: self.enum_choices.clone().filter(|_| same_kind),
            item_type,
        }
        .validated()
    }

    fn coerced(&self, literal: &str) -> ValueResult<Self> {
        Self {
            value: Value::parse_literal(self.kind, literal, self.item_type)?,
            is_dynamic: false,
            original: None,
            ..self.clone()
        }
        .validated()
    }

    fn validated(self) -> ValueResult<Self> {
        self.validate()?;
        Ok(self)
    }
}

impl TryFrom<RawTypedValue> for TypedValue {
    type Error = ValueError;

    fn try_from(raw: RawTypedValue) -> Result<Self, Self::Error> {
        let value = if raw.is_dynamic && raw.value.is_null() {
            Value::zero(raw.kind, raw.enum_choices.as_deref())
        } else {
            Value::from_json(raw.kind, &raw.value, raw.item_type)?
        };
        Self {
            kind: raw.kind,
            value,
            is_dynamic: raw.is_dynamic,
            original: raw.original,
            enum_choices: raw.enum_choices,
            item_type: raw.item_type,
        }
        .validated()
    }
}

impl From<TypedValue> for RawTypedValue {
    fn from(tv: TypedValue) -> Self {
        Self {
            kind: tv.kind,
            value: tv.value.to_json(),
            is_dynamic: tv.is_dynamic,
            original: tv.original,
            enum_choices: tv.enum_choices,
            item_type: tv.item_type,
        }
    }
}

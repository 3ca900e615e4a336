//! Dynfield Values
//!
//! The atomic unit of the dynamic field system: a value, its type tag and,
//! when dynamic, the expression it was computed from.
//!
//! # Overview
//!
//! - **ValueType**: closed set of type tags (`integer`, `timerange`, `enum`, ...)
//! - **Value**: runtime representation, one variant per tag, with literal and JSON coercion
//! - **TypedValue**: validated value plus dynamic metadata
//! - **EvaluationRecord**: timestamped snapshot appended to a field's history
//!
//! # Example
//!
//! ```rust
//! use dynfield_value::{TypedValue, Value, ValueType};
//!
//! let retries = TypedValue::from_literal(ValueType::Integer, "3").unwrap();
//! let updated = retries.with_literal("5").unwrap();
//! assert_eq!(updated.value(), &Value::Integer(5));
//!
//! let sum = TypedValue::new_dynamic(ValueType::Integer, "(+ 1 2)").unwrap();
//! assert!(sum.is_dynamic());
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod record;
pub mod time;
pub mod typed_value;
pub mod value;
pub mod value_type;

// Re-exports
pub use error::{ValueError, ValueResult};
pub use record::EvaluationRecord;
pub use time::{TimeLength, TimeRange};
pub use typed_value::{RawTypedValue, TypedValue};
pub use value::Value;
pub use value_type::ValueType;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with typed values
    pub use crate::{EvaluationRecord, TypedValue, Value, ValueError, ValueType};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

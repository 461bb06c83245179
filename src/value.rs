use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::BehaviorError;

/// Scalar value read from or written to a managed field.
///
/// Identifiers, structural columns, positions, group values and slugs all
/// travel through this type, so it is hashable and totally ordered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Reads a JSON document value; arrays, objects and non-integral numbers
    /// have no scalar representation.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(FieldValue::Null),
            JsonValue::Bool(value) => Some(FieldValue::Bool(*value)),
            JsonValue::Number(number) => number.as_i64().map(FieldValue::Int),
            JsonValue::String(value) => Some(FieldValue::Text(value.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Bool(value) => JsonValue::Bool(*value),
            FieldValue::Int(value) => JsonValue::from(*value),
            FieldValue::Text(value) => JsonValue::String(value.clone()),
        }
    }

    /// Bind value for SQL statements. `None` for null, which callers turn
    /// into `IS NULL` predicates or a literal `NULL` assignment.
    pub fn to_sql(&self) -> Option<sea_orm::Value> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(value) => Some(sea_orm::Value::from(*value)),
            FieldValue::Int(value) => Some(sea_orm::Value::from(*value)),
            FieldValue::Text(value) => Some(sea_orm::Value::from(value.clone())),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Conversion back into a concrete field type, used by generated setters.
pub trait FromFieldValue: Sized {
    fn from_field_value(value: FieldValue) -> Result<Self, BehaviorError>;
}

impl FromFieldValue for FieldValue {
    fn from_field_value(value: FieldValue) -> Result<Self, BehaviorError> {
        Ok(value)
    }
}

impl FromFieldValue for i64 {
    fn from_field_value(value: FieldValue) -> Result<Self, BehaviorError> {
        match value {
            FieldValue::Int(value) => Ok(value),
            other => Err(BehaviorError::unexpected(format!(
                "expected an integer, found {other:?}"
            ))),
        }
    }
}

impl FromFieldValue for i32 {
    fn from_field_value(value: FieldValue) -> Result<Self, BehaviorError> {
        let wide = i64::from_field_value(value)?;
        i32::try_from(wide)
            .map_err(|_| BehaviorError::unexpected(format!("{wide} does not fit into i32")))
    }
}

impl FromFieldValue for u32 {
    fn from_field_value(value: FieldValue) -> Result<Self, BehaviorError> {
        let wide = i64::from_field_value(value)?;
        u32::try_from(wide)
            .map_err(|_| BehaviorError::unexpected(format!("{wide} does not fit into u32")))
    }
}

impl FromFieldValue for bool {
    fn from_field_value(value: FieldValue) -> Result<Self, BehaviorError> {
        match value {
            FieldValue::Bool(value) => Ok(value),
            other => Err(BehaviorError::unexpected(format!(
                "expected a boolean, found {other:?}"
            ))),
        }
    }
}

impl FromFieldValue for String {
    fn from_field_value(value: FieldValue) -> Result<Self, BehaviorError> {
        match value {
            FieldValue::Text(value) => Ok(value),
            other => Err(BehaviorError::unexpected(format!(
                "expected a string, found {other:?}"
            ))),
        }
    }
}

impl<T: FromFieldValue> FromFieldValue for Option<T> {
    fn from_field_value(value: FieldValue) -> Result<Self, BehaviorError> {
        match value {
            FieldValue::Null => Ok(None),
            other => T::from_field_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_map_null() {
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
        assert_eq!(
            Option::<i32>::from_field_value(FieldValue::Int(4)).unwrap(),
            Some(4)
        );
        assert_eq!(Option::<String>::from_field_value(FieldValue::Null).unwrap(), None);
    }

    #[test]
    fn json_numbers_must_be_integral() {
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(12)),
            Some(FieldValue::Int(12))
        );
        assert_eq!(FieldValue::from_json(&serde_json::json!(1.5)), None);
        assert!(i32::from_field_value(FieldValue::Int(i64::MAX)).is_err());
    }
}

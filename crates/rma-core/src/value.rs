//! Leaf values carried by the object graph and the wire protocol.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, ResolveResult};

/// Declared type of a leaf attribute.
///
/// A mutator's declared kind decides how an incoming value is converted
/// before it reaches the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Long,
    Double,
    Text,
    Timestamp,
}

impl ValueKind {
    /// Returns the lowercase name used in messages and notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar value held at a leaf of the object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Long(_) => ValueKind::Long,
            Self::Double(_) => ValueKind::Double,
            Self::Text(_) => ValueKind::Text,
            Self::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    /// Returns the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a 64-bit integer when it is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts this value to the target kind.
    ///
    /// Text is parsed, integers widen freely and narrow only when the value
    /// fits, and every non-null scalar renders to text. Null is accepted only
    /// by the reference-like kinds (text and timestamp).
    pub fn coerce(self, target: ValueKind) -> ResolveResult<Value> {
        let found = self.kind();
        if found == target {
            return Ok(self);
        }

        let mismatch = || ResolveError::mismatch(target, found);

        match (self, target) {
            (Value::Null, ValueKind::Text | ValueKind::Timestamp) => Ok(Value::Null),
            (Value::Null, _) => Err(mismatch()),
            (other, ValueKind::Text) => Ok(Value::Text(other.to_string())),

            (Value::Text(s), ValueKind::Bool) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            (Value::Text(s), ValueKind::Int) => {
                s.trim().parse().map(Value::Int).map_err(|_| mismatch())
            }
            (Value::Text(s), ValueKind::Long) => {
                s.trim().parse().map(Value::Long).map_err(|_| mismatch())
            }
            (Value::Text(s), ValueKind::Double) => {
                s.trim().parse().map(Value::Double).map_err(|_| mismatch())
            }
            (Value::Text(s), ValueKind::Timestamp) => DateTime::parse_from_rfc3339(s.trim())
                .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
                .map_err(|_| mismatch()),

            (Value::Int(v), ValueKind::Long) => Ok(Value::Long(i64::from(v))),
            (Value::Int(v), ValueKind::Double) => Ok(Value::Double(f64::from(v))),
            (Value::Long(v), ValueKind::Int) => {
                i32::try_from(v).map(Value::Int).map_err(|_| mismatch())
            }
            // Precision loss above 2^53 is accepted, as for any double attribute.
            (Value::Long(v), ValueKind::Double) => Ok(Value::Double(v as f64)),

            _ => Err(mismatch()),
        }
    }

    /// Renders the value as plain JSON (no type tag).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::from(*b),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Long(v) => serde_json::Value::from(*v),
            Self::Double(v) => serde_json::Value::from(*v),
            Self::Text(s) => serde_json::Value::from(s.as_str()),
            Self::Timestamp(t) => serde_json::Value::from(t.to_rfc3339()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(t) => f.write_str(&t.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_kind_passes_through() {
        let v = Value::Int(7).coerce(ValueKind::Int).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn test_text_parses_into_numbers() {
        assert_eq!(
            Value::from(" 42 ").coerce(ValueKind::Int).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            Value::from("9000000000").coerce(ValueKind::Long).unwrap(),
            Value::Long(9_000_000_000)
        );
        assert_eq!(
            Value::from("2.5").coerce(ValueKind::Double).unwrap(),
            Value::Double(2.5)
        );
        assert_eq!(
            Value::from("TRUE").coerce(ValueKind::Bool).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_unparseable_text_is_mismatch() {
        let err = Value::from("abc").coerce(ValueKind::Int).unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn test_integer_widening_and_narrowing() {
        assert_eq!(Value::Int(5).coerce(ValueKind::Long).unwrap(), Value::Long(5));
        assert_eq!(Value::Long(5).coerce(ValueKind::Int).unwrap(), Value::Int(5));

        let err = Value::Long(i64::from(i32::MAX) + 1)
            .coerce(ValueKind::Int)
            .unwrap_err();
        assert!(matches!(err, ResolveError::TypeMismatch { .. }));
    }

    #[test]
    fn test_scalars_render_to_text() {
        assert_eq!(
            Value::Long(12).coerce(ValueKind::Text).unwrap(),
            Value::Text("12".to_string())
        );
        assert_eq!(
            Value::Bool(false).coerce(ValueKind::Text).unwrap(),
            Value::Text("false".to_string())
        );
    }

    #[test]
    fn test_null_only_for_reference_kinds() {
        assert_eq!(Value::Null.coerce(ValueKind::Text).unwrap(), Value::Null);
        assert_eq!(Value::Null.coerce(ValueKind::Timestamp).unwrap(), Value::Null);
        assert!(Value::Null.coerce(ValueKind::Long).is_err());
    }

    #[test]
    fn test_timestamp_from_rfc3339() {
        let v = Value::from("2024-03-01T10:00:00Z")
            .coerce(ValueKind::Timestamp)
            .unwrap();
        assert_eq!(v.kind(), ValueKind::Timestamp);
    }

    #[test]
    fn test_double_does_not_narrow_to_integer() {
        assert!(Value::Double(1.0).coerce(ValueKind::Int).is_err());
    }

    #[test]
    fn test_value_wire_format() {
        let json = serde_json::to_string(&Value::Int(3)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":3}"#);

        let parsed: Value = serde_json::from_str(r#"{"type":"text","value":"R2"}"#).unwrap();
        assert_eq!(parsed, Value::from("R2"));

        let null: Value = serde_json::from_str(r#"{"type":"null"}"#).unwrap();
        assert_eq!(null, Value::Null);
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(4_i64)), Value::Long(4));
    }
}

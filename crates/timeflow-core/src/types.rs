//! Core data types for the TimeFlow query engine

use serde::{Deserialize, Serialize};

/// Nanosecond-precision Unix epoch timestamp
pub type Timestamp = i64;

/// Field value types supported by the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// 64-bit floating point
    Float(f64),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit unsigned integer
    UnsignedInteger(u64),
    /// UTF-8 string
    String(String),
    /// Boolean value
    Boolean(bool),
}

impl FieldValue {
    /// Get the type name of this field value
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Float(_) => "float",
            FieldValue::Integer(_) => "integer",
            FieldValue::UnsignedInteger(_) => "unsigned",
            FieldValue::String(_) => "string",
            FieldValue::Boolean(_) => "boolean",
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::UnsignedInteger(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::UnsignedInteger(v) => {
                if *v <= i64::MAX as u64 {
                    Some(*v as i64)
                } else {
                    None
                }
            }
            FieldValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Try to get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UnsignedInteger(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

/// A single stored observation as yielded by a point iterator.
///
/// `raw` carries the storage encoding of the point's field values so raw
/// queries can defer decoding to the transaction; `value` is the already
/// decoded value of the one field a simple select statement references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp in nanoseconds since Unix epoch
    pub timestamp: Timestamp,
    /// Storage-encoded field data
    pub raw: Vec<u8>,
    /// Decoded value of the selected field
    pub value: FieldValue,
}

impl Point {
    /// Create a new point
    pub fn new(timestamp: Timestamp, raw: Vec<u8>, value: impl Into<FieldValue>) -> Self {
        Self {
            timestamp,
            raw,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_conversions() {
        let fv = FieldValue::Float(3.14);
        assert_eq!(fv.as_f64(), Some(3.14));
        assert_eq!(fv.type_name(), "float");

        let fv = FieldValue::Integer(-42);
        assert_eq!(fv.as_i64(), Some(-42));
        assert_eq!(fv.as_f64(), Some(-42.0));

        let fv = FieldValue::UnsignedInteger(100);
        assert_eq!(fv.as_i64(), Some(100));

        let fv = FieldValue::String("hello".to_string());
        assert_eq!(fv.as_str(), Some("hello"));
        assert_eq!(fv.as_f64(), None);

        let fv = FieldValue::Boolean(true);
        assert_eq!(fv.as_bool(), Some(true));
    }

    #[test]
    fn test_field_value_from_impls() {
        let fv: FieldValue = 3.14_f64.into();
        assert!(matches!(fv, FieldValue::Float(_)));

        let fv: FieldValue = 42_i64.into();
        assert!(matches!(fv, FieldValue::Integer(_)));

        let fv: FieldValue = 42_u64.into();
        assert!(matches!(fv, FieldValue::UnsignedInteger(_)));

        let fv: FieldValue = "hello".into();
        assert!(matches!(fv, FieldValue::String(_)));

        let fv: FieldValue = true.into();
        assert!(matches!(fv, FieldValue::Boolean(_)));
    }

    #[test]
    fn test_unsigned_overflow_as_i64() {
        let fv = FieldValue::UnsignedInteger(u64::MAX);
        assert_eq!(fv.as_i64(), None);
    }

    #[test]
    fn test_point_construction() {
        let p = Point::new(1_000_000_000, vec![1, 2, 3], 42.5_f64);
        assert_eq!(p.timestamp, 1_000_000_000);
        assert_eq!(p.raw, vec![1, 2, 3]);
        assert_eq!(p.value, FieldValue::Float(42.5));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let p = Point::new(1609459200000000000, vec![0xde, 0xad], 64.5_f64);

        let encoded = bincode::serialize(&p).unwrap();
        let decoded: Point = bincode::deserialize(&encoded).unwrap();
        assert_eq!(p, decoded);

        let json = serde_json::to_string(&p).unwrap();
        let decoded: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(p, decoded);
    }
}

//! Intermediate values flowing between map and reduce stages
//!
//! Every MapFn/ReduceFn pair agrees on one variant of `Value` as its
//! intermediate representation. Modeling the payload as a tagged sum keeps
//! shape violations inside the pipeline observable as typed errors instead
//! of panics.

use crate::error::{EngineError, Result};
use timeflow_core::FieldValue;

/// A payload carried through emitter channels.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A terminal field value (also the only shape the row assembler accepts)
    Field(FieldValue),
    /// Partial mean: per-window count and sum
    MeanState { count: u64, sum: f64 },
    /// Partial spread: per-window min and max
    SpreadState { min: f64, max: f64 },
    /// Time-stamped value for first/last
    TimedState { time: i64, value: FieldValue },
    /// Batched raw samples for stddev
    Samples(Vec<f64>),
    /// Echoed window values for percentile
    Echo(Vec<FieldValue>),
    /// Batched undecoded points for raw queries
    RawBatch(Vec<RawPoint>),
}

/// One undecoded point captured by a raw-query mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoint {
    pub timestamp: i64,
    pub raw: Vec<u8>,
}

impl Value {
    /// Short name of this value's shape, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Field(v) => v.type_name(),
            Value::MeanState { .. } => "mean state",
            Value::SpreadState { .. } => "spread state",
            Value::TimedState { .. } => "timed state",
            Value::Samples(_) => "sample batch",
            Value::Echo(_) => "echoed values",
            Value::RawBatch(_) => "raw batch",
        }
    }

    /// Extract a numeric terminal value
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Field(v) => v.as_f64().ok_or(EngineError::FieldTypeMismatch {
                expected: "float",
                actual: v.type_name(),
            }),
            other => Err(EngineError::FieldTypeMismatch {
                expected: "float",
                actual: other.kind(),
            }),
        }
    }

    /// Extract the terminal field value
    pub fn into_field(self) -> Result<FieldValue> {
        match self {
            Value::Field(v) => Ok(v),
            other => Err(EngineError::FieldTypeMismatch {
                expected: "field value",
                actual: other.kind(),
            }),
        }
    }
}

impl From<FieldValue> for Value {
    fn from(v: FieldValue) -> Self {
        Value::Field(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Field(FieldValue::Float(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_f64_accepts_numeric_fields() {
        assert_eq!(Value::from(2.5).as_f64().unwrap(), 2.5);
        assert_eq!(Value::Field(FieldValue::Integer(3)).as_f64().unwrap(), 3.0);
    }

    #[test]
    fn test_as_f64_rejects_non_numeric() {
        let err = Value::Field(FieldValue::String("x".into())).as_f64().unwrap_err();
        assert!(matches!(
            err,
            EngineError::FieldTypeMismatch { actual: "string", .. }
        ));

        let err = Value::Samples(vec![1.0]).as_f64().unwrap_err();
        assert!(matches!(
            err,
            EngineError::FieldTypeMismatch { actual: "sample batch", .. }
        ));
    }

    #[test]
    fn test_into_field() {
        let v = Value::Field(FieldValue::Boolean(true));
        assert_eq!(v.into_field().unwrap(), FieldValue::Boolean(true));

        assert!(Value::Echo(Vec::new()).into_field().is_err());
    }
}

//! Engine error types

use thiserror::Error;

/// Query engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("expected {expected} argument(s) for {name}()")]
    WrongArity { name: String, expected: usize },

    #[error("expected field argument in {0}()")]
    NotAFieldArgument(String),

    #[error("expected numeric second argument for percentile()")]
    InvalidPercentileArgument,

    #[error("query has a raw field mixed with an aggregate in the select")]
    RawFieldWithAggregate,

    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("field type mismatch: expected {expected}, got {actual}")]
    FieldTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("operator {op} not supported for operand type {operand}")]
    Operator { op: String, operand: String },

    #[error("query cancelled")]
    Cancelled,
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<timeflow_core::CoreError> for EngineError {
    fn from(e: timeflow_core::CoreError) -> Self {
        EngineError::Storage(e.to_string())
    }
}

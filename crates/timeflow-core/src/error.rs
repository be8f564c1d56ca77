//! Core error types

use thiserror::Error;

/// Core errors
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("truncated tagset: segment header at offset {0} runs past the buffer")]
    TruncatedTagSet(usize),

    #[error("tagset segment at offset {0} is not valid UTF-8")]
    InvalidTagSegment(usize),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

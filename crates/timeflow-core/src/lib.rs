//! TimeFlow Core - Core types for the time series query engine
//!
//! This crate provides the fundamental data types shared between the query
//! engine and storage implementations:
//! - `Timestamp`: Nanosecond-precision Unix epoch timestamps
//! - `FieldValue`: Typed field values (Float, Integer, String, Boolean, etc.)
//! - `Point`: A single stored observation as yielded by a point iterator
//! - `TagSet`: The encoded dimensional tag values of one series

pub mod error;
pub mod tagset;
pub mod types;

pub use error::{CoreError, Result};
pub use tagset::TagSet;
pub use types::{FieldValue, Point, Timestamp};

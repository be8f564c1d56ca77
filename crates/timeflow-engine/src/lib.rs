//! TimeFlow Engine - Query execution engine for time series selections
//!
//! This crate plans and executes selection statements over transactional
//! point iterators:
//! - Statement model for the resolved expression tree
//! - Planner translating statements into a graph of streaming processors
//! - Map/reduce execution with interval-aligned bucketing and cross-shard
//!   merging
//! - Aggregation catalog (count, sum, mean, min, max, spread, stddev,
//!   first, last, percentile, raw)
//! - Row assembly interleaving per-field streams into ordered result rows
//!
//! The parser, the storage layer and the wire surface are external; storage
//! plugs in through the `Database`/`Transaction`/`PointIterator` traits.

pub mod aggregate;
pub mod config;
pub mod emit;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod planner;
pub mod processor;
pub mod reducer;
pub mod row;
pub mod statement;
pub mod tx;
pub mod value;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::EngineConfig;
pub use emit::{Batch, BatchReceiver, Emitter, Key, Record};
pub use error::{EngineError, Result};
pub use executor::Executor;
pub use mapper::{BufferedIterator, MapFn, Mapper};
pub use planner::Planner;
pub use processor::{BinaryExprEvaluator, LiteralProcessor, Processor};
pub use reducer::{ReduceFn, Reducer};
pub use row::{Row, RowValue};
pub use statement::{
    BinaryOp, Dimension, Expr, Field, Literal, Measurement, SelectStatement, StatementBuilder,
};
pub use tx::{Database, PointIterator, Transaction};
pub use value::{RawPoint, Value};

//! Storage capability consumed by the engine
//!
//! The storage/transaction layer is an external collaborator. The engine
//! only requires the three traits below: a way to begin transactions, the
//! per-query transaction itself, and forward-only point iterators. All
//! planning and execution is generic over them, which is also what the
//! integration tests exploit with an in-memory implementation.

use crate::error::Result;
use crate::statement::{Field, SelectStatement};
use timeflow_core::{FieldValue, Point, TagSet};

/// A source of transactions
pub trait Database {
    type Tx: Transaction;

    /// Begin an unopened transaction
    fn begin(&self) -> Result<Self::Tx>;
}

/// A per-query storage transaction.
///
/// Must be opened before iterators are read and closed when the query is
/// done; close releases all iterators created from it.
pub trait Transaction: Send + 'static {
    /// Open the transaction. Idempotent.
    fn open(&mut self) -> Result<()>;

    /// Close the transaction and release all iterators
    fn close(&mut self) -> Result<()>;

    /// Inject the query wall-clock, nanoseconds since epoch
    fn set_now(&mut self, now_ns: i64);

    /// Create one iterator per shard/series covering the statement's
    /// condition. The statement must reference a single measurement and a
    /// single variable reference per field.
    fn create_iterators(&mut self, stmt: &SelectStatement) -> Result<Vec<Box<dyn PointIterator>>>;

    /// Resolve field names to numeric ids; a missing field is an error
    fn field_ids(&self, fields: &[Field]) -> Result<Vec<u8>>;

    /// Decode one raw point into column-ordered values. The first value is
    /// the timestamp, matching the row column list that leads with "time".
    fn decode_values(&self, field_ids: &[u8], timestamp: i64, raw: &[u8]) -> Vec<FieldValue>;
}

/// A forward-only cursor over the points of one shard/series
pub trait PointIterator: Send + 'static {
    /// The encoded dimensional tag values of this iterator's series
    fn tags(&self) -> TagSet;

    /// The next point, or `None` at end of stream
    fn next(&mut self) -> Option<Point>;
}

//! Keys, records and the bounded emitter channel

use crate::error::{EngineError, Result};
use crate::value::Value;
use std::collections::HashMap;
use timeflow_core::TagSet;
use tokio::sync::mpsc;

/// Grouping coordinate produced by map and reduce stages.
///
/// Ordered by (timestamp, tagset), which is the emission order reducers
/// guarantee. The timestamp is the window start, or 0 for raw queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub timestamp: i64,
    pub values: TagSet,
}

impl Key {
    /// Create a new key
    pub fn new(timestamp: i64, values: TagSet) -> Self {
        Self { timestamp, values }
    }
}

/// A single keyed value read off an emitter channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
}

/// One message on an emitter channel. Holds a single key in the current
/// design; the map shape is what lets the binary evaluator join batches
/// key-wise.
pub type Batch = HashMap<Key, Value>;

/// Receiving half of an emitter channel.
pub type BatchReceiver = mpsc::Receiver<Result<Batch>>;

/// Sending half of an emitter channel.
///
/// Producers run on plain threads and use blocking sends; a send failure
/// means every receiver is gone, which is how consumer teardown propagates
/// upstream.
pub struct Emitter {
    tx: mpsc::Sender<Result<Batch>>,
}

impl Emitter {
    /// Create a bounded emitter and its receiving half
    pub fn bounded(capacity: usize) -> (Self, BatchReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Emit a single key/value pair
    pub fn emit(&self, key: Key, value: Value) -> Result<()> {
        let mut batch = Batch::with_capacity(1);
        batch.insert(key, value);
        self.emit_batch(batch)
    }

    /// Emit a prepared batch
    pub fn emit_batch(&self, batch: Batch) -> Result<()> {
        self.tx
            .blocking_send(Ok(batch))
            .map_err(|_| EngineError::Cancelled)
    }

    /// Forward an error downstream. Best effort: if the consumer is already
    /// gone there is nobody left to tell.
    pub fn fail(&self, err: EngineError) {
        let _ = self.tx.blocking_send(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeflow_core::FieldValue;

    #[test]
    fn test_key_ordering() {
        let a = Key::new(1, TagSet::encode(&["x"]));
        let b = Key::new(2, TagSet::encode(&["a"]));
        let c = Key::new(2, TagSet::encode(&["b"]));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_emit_and_receive() {
        let (emitter, mut rx) = Emitter::bounded(4);
        emitter
            .emit(Key::new(5, TagSet::default()), Value::from(1.5))
            .unwrap();
        drop(emitter);

        let batch = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        let (key, value) = batch.into_iter().next().unwrap();
        assert_eq!(key.timestamp, 5);
        assert_eq!(value, Value::Field(FieldValue::Float(1.5)));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_emit_after_receiver_drop_is_cancelled() {
        let (emitter, rx) = Emitter::bounded(1);
        drop(rx);
        let err = emitter
            .emit(Key::default(), Value::from(0.0))
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}

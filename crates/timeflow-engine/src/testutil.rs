//! Shared helpers for unit tests

use crate::emit::{BatchReceiver, Emitter, Key, Record};
use crate::error::Result;
use crate::mapper::{BufferedIterator, Mapper};
use crate::reducer::ReduceFn;
use crate::tx::PointIterator;
use crate::value::Value;
use std::sync::Arc;
use timeflow_core::{Point, TagSet};

/// In-memory point iterator over a prepared vector.
pub struct VecIterator {
    tags: TagSet,
    points: std::vec::IntoIter<Point>,
}

impl VecIterator {
    pub fn new(tags: TagSet, points: Vec<Point>) -> Self {
        Self {
            tags,
            points: points.into_iter(),
        }
    }
}

impl PointIterator for VecIterator {
    fn tags(&self) -> TagSet {
        self.tags.clone()
    }

    fn next(&mut self) -> Option<Point> {
        self.points.next()
    }
}

/// Drain a receiver into the flattened record list, panicking on error
/// batches.
pub fn drain_records(mut rx: BatchReceiver) -> Vec<Record> {
    let mut records = Vec::new();
    while let Some(batch) = rx.blocking_recv() {
        let batch = batch.expect("unexpected error batch");
        for (key, value) in batch {
            records.push(Record { key, value });
        }
    }
    records
}

/// Run one map function over the points via a full mapper and collect the
/// emitted records.
pub fn map_window(
    f: fn(&mut BufferedIterator, &Emitter, i64) -> Result<()>,
    points: Vec<Point>,
    interval: i64,
) -> Vec<Record> {
    let itr = VecIterator::new(TagSet::default(), points);
    let mapper = Mapper::new(Arc::new(f), Box::new(itr), interval, 64);
    drain_records(mapper.start())
}

/// Reduce the given records under their first key with a plain reduce
/// function and return the first emitted record.
pub fn reduce_one(
    f: fn(&Key, Vec<Value>, &Emitter) -> Result<()>,
    records: Vec<Record>,
) -> Option<Record> {
    let f: ReduceFn = Arc::new(f);
    reduce_one_with(&f, records)
}

/// Like `reduce_one`, for boxed reduce functions such as percentile.
pub fn reduce_one_with(f: &ReduceFn, records: Vec<Record>) -> Option<Record> {
    let key = records
        .first()
        .map(|r| r.key.clone())
        .unwrap_or_default();
    let values: Vec<Value> = records.into_iter().map(|r| r.value).collect();

    let (emitter, rx) = Emitter::bounded(64);
    f.as_ref()(&key, values, &emitter).expect("reduce failed");
    drop(emitter);
    drain_records(rx).into_iter().next()
}

//! Reducer stage: cross-mapper merge and keyed reduction
//!
//! A reducer reads the emitters of all its child mappers simultaneously and
//! merges records tick by tick: every tick covers exactly one timestamp (the
//! minimum still pending across inputs), groups the records of that
//! timestamp by key, and reduces each key. Grouping into a `BTreeMap` yields
//! the (timestamp, tagset) key order that makes output deterministic
//! regardless of shard interleaving.

use crate::emit::{BatchReceiver, Emitter, Key, Record};
use crate::error::{EngineError, Result};
use crate::mapper::Mapper;
use crate::processor::Processor;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// A reduce function merges the intermediates gathered for one key and
/// emits the final value(s) for it.
pub type ReduceFn = Arc<dyn Fn(&Key, Vec<Value>, &Emitter) -> Result<()> + Send + Sync>;

/// Merges mapper outputs and applies a reduce function per key.
pub struct Reducer {
    name: String,
    reduce_fn: ReduceFn,
    mappers: Vec<Mapper>,
    is_raw: bool,
    capacity: usize,
}

impl Reducer {
    /// Create a reducer over a set of mappers
    pub fn new(reduce_fn: ReduceFn, mappers: Vec<Mapper>, capacity: usize) -> Self {
        Self {
            name: String::new(),
            reduce_fn,
            mappers,
            is_raw: false,
            capacity,
        }
    }

    /// Set the source name reported for rows produced from this reducer
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark this reducer as producing raw (undecoded) query output
    pub fn raw(mut self) -> Self {
        self.is_raw = true;
        self
    }
}

impl Processor for Reducer {
    fn process(&mut self) -> BatchReceiver {
        let inputs: Vec<BufferedInput> = self
            .mappers
            .drain(..)
            .map(|m| BufferedInput::new(m.start()))
            .collect();
        let (emitter, rx) = Emitter::bounded(self.capacity);
        let reduce_fn = Arc::clone(&self.reduce_fn);
        thread::spawn(move || {
            if let Err(e) = run_reduce_loop(&reduce_fn, inputs, &emitter) {
                match e {
                    EngineError::Cancelled => debug!("reducer stopped: consumer gone"),
                    e => emitter.fail(e),
                }
            }
        });
        rx
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_raw(&self) -> bool {
        self.is_raw
    }
}

fn run_reduce_loop(
    reduce_fn: &ReduceFn,
    mut inputs: Vec<BufferedInput>,
    emitter: &Emitter,
) -> Result<()> {
    loop {
        // The next tick covers the smallest timestamp still pending.
        let mut target: Option<i64> = None;
        for input in &mut inputs {
            if let Some(ts) = input.peek_timestamp()? {
                target = Some(target.map_or(ts, |t| t.min(ts)));
            }
        }
        let Some(target) = target else {
            break;
        };

        let mut groups: BTreeMap<Key, Vec<Value>> = BTreeMap::new();
        for input in &mut inputs {
            while let Some(rec) = input.read()? {
                if rec.key.timestamp != target {
                    input.unread(rec);
                    break;
                }
                groups.entry(rec.key).or_default().push(rec.value);
            }
        }
        if groups.is_empty() {
            break;
        }

        for (key, values) in groups {
            reduce_fn.as_ref()(&key, values, emitter)?;
        }
    }
    Ok(())
}

/// One mapper output with single-record pushback.
struct BufferedInput {
    rx: BatchReceiver,
    buf: Option<Record>,
    done: bool,
}

impl BufferedInput {
    fn new(rx: BatchReceiver) -> Self {
        Self {
            rx,
            buf: None,
            done: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.buf.is_none() && !self.done {
            match self.rx.blocking_recv() {
                None => self.done = true,
                Some(Err(e)) => return Err(e),
                Some(Ok(batch)) => {
                    // Single-entry batches by contract; an empty one is
                    // skipped rather than treated as end of input.
                    if let Some((key, value)) = batch.into_iter().next() {
                        self.buf = Some(Record { key, value });
                    }
                }
            }
        }
        Ok(())
    }

    fn peek_timestamp(&mut self) -> Result<Option<i64>> {
        self.fill()?;
        Ok(self.buf.as_ref().map(|r| r.key.timestamp))
    }

    fn read(&mut self) -> Result<Option<Record>> {
        self.fill()?;
        Ok(self.buf.take())
    }

    fn unread(&mut self, rec: Record) {
        self.buf = Some(rec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate;
    use crate::mapper::MapFn;
    use crate::testutil::{drain_records, VecIterator};
    use timeflow_core::{FieldValue, Point, TagSet};

    fn sum_mapper(data: &[(i64, f64)], tags: TagSet, interval: i64) -> Mapper {
        let points = data
            .iter()
            .map(|&(ts, v)| Point::new(ts, Vec::new(), v))
            .collect();
        let map_fn: MapFn = Arc::new(aggregate::map_sum);
        Mapper::new(map_fn, Box::new(VecIterator::new(tags, points)), interval, 16)
    }

    #[test]
    fn test_merge_is_in_timestamp_order_across_shards() {
        // Two shards with interleaved windows.
        let a = sum_mapper(&[(5, 1.0), (25, 2.0)], TagSet::default(), 10);
        let b = sum_mapper(&[(15, 4.0), (35, 8.0)], TagSet::default(), 10);

        let mut reducer =
            Reducer::new(Arc::new(aggregate::reduce_sum), vec![a, b], 16).named("m");
        let records = drain_records(reducer.process());

        let times: Vec<i64> = records.iter().map(|r| r.key.timestamp).collect();
        assert_eq!(times, vec![0, 10, 20, 30]);
        let sums: Vec<f64> = records
            .iter()
            .map(|r| match &r.value {
                Value::Field(FieldValue::Float(v)) => *v,
                other => panic!("unexpected value: {:?}", other),
            })
            .collect();
        assert_eq!(sums, vec![1.0, 4.0, 2.0, 8.0]);
    }

    #[test]
    fn test_same_timestamp_merges_across_shards() {
        let a = sum_mapper(&[(5, 1.0)], TagSet::default(), 10);
        let b = sum_mapper(&[(7, 10.0)], TagSet::default(), 10);

        let mut reducer =
            Reducer::new(Arc::new(aggregate::reduce_sum), vec![a, b], 16).named("m");
        let records = drain_records(reducer.process());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.timestamp, 0);
        assert_eq!(records[0].value, Value::Field(FieldValue::Float(11.0)));
    }

    #[test]
    fn test_keys_within_a_tick_are_ordered_by_tagset() {
        let tags_b = TagSet::encode(&["b"]);
        let tags_a = TagSet::encode(&["a"]);
        // Shard order deliberately has the higher tagset first.
        let x = sum_mapper(&[(5, 2.0)], tags_b.clone(), 10);
        let y = sum_mapper(&[(6, 1.0)], tags_a.clone(), 10);

        let mut reducer =
            Reducer::new(Arc::new(aggregate::reduce_sum), vec![x, y], 16).named("m");
        let records = drain_records(reducer.process());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.values, tags_a);
        assert_eq!(records[1].key.values, tags_b);
    }

    #[test]
    fn test_upstream_error_is_forwarded() {
        let points = vec![Point::new(5, Vec::new(), "not a number")];
        let map_fn: MapFn = Arc::new(aggregate::map_sum);
        let mapper = Mapper::new(
            map_fn,
            Box::new(VecIterator::new(TagSet::default(), points)),
            0,
            16,
        );

        let mut reducer =
            Reducer::new(Arc::new(aggregate::reduce_sum), vec![mapper], 16).named("m");
        let mut rx = reducer.process();

        let first = rx.blocking_recv().unwrap();
        assert!(matches!(
            first,
            Err(EngineError::FieldTypeMismatch { .. })
        ));
        assert!(rx.blocking_recv().is_none());
    }
}

//! Aggregation catalog
//!
//! Each aggregate is a (MapFn, ReduceFn) pair with an agreed intermediate
//! representation (see `Value`). Map functions drain one interval window
//! from a buffered iterator and emit per-window intermediates; reduce
//! functions merge the intermediates gathered for one key across all shards
//! and emit the final value.

use crate::emit::{Emitter, Key};
use crate::error::{EngineError, Result};
use crate::mapper::{BufferedIterator, MapFn};
use crate::reducer::ReduceFn;
use crate::statement::{Expr, Literal};
use crate::value::{RawPoint, Value};
use std::sync::Arc;
use timeflow_core::{FieldValue, Point};

/// How many values a map function buffers before emitting a batch.
/// Unbounded accumulation inside one window could otherwise exhaust memory.
pub const EMIT_BATCH_SIZE: usize = 1000;

/// Resolve a function name to its map/reduce pair, validating arity and the
/// percentile argument. The first-argument-is-a-field check stays with the
/// planner, which owns the expression context.
pub fn lookup(name: &str, args: &[Expr]) -> Result<(MapFn, ReduceFn)> {
    let lower = name.to_lowercase();
    if lower == "percentile" {
        if args.len() != 2 {
            return Err(EngineError::WrongArity {
                name: name.to_string(),
                expected: 2,
            });
        }
    } else if args.len() != 1 {
        return Err(EngineError::WrongArity {
            name: name.to_string(),
            expected: 1,
        });
    }

    match lower.as_str() {
        "count" => Ok((Arc::new(map_count), Arc::new(reduce_sum))),
        "sum" => Ok((Arc::new(map_sum), Arc::new(reduce_sum))),
        "mean" => Ok((Arc::new(map_mean), Arc::new(reduce_mean))),
        "min" => Ok((Arc::new(map_min), Arc::new(reduce_min))),
        "max" => Ok((Arc::new(map_max), Arc::new(reduce_max))),
        "spread" => Ok((Arc::new(map_spread), Arc::new(reduce_spread))),
        "stddev" => Ok((Arc::new(map_stddev), Arc::new(reduce_stddev))),
        "first" => Ok((Arc::new(map_first), Arc::new(reduce_first))),
        "last" => Ok((Arc::new(map_last), Arc::new(reduce_last))),
        "percentile" => {
            let p = match &args[1] {
                Expr::Literal(Literal::Number(p)) => *p,
                _ => return Err(EngineError::InvalidPercentileArgument),
            };
            Ok((Arc::new(map_echo), reduce_percentile(p)))
        }
        _ => Err(EngineError::UnknownFunction(name.to_string())),
    }
}

fn numeric(p: &Point) -> Result<f64> {
    p.value.as_f64().ok_or(EngineError::FieldTypeMismatch {
        expected: "float",
        actual: p.value.type_name(),
    })
}

fn state_mismatch(expected: &'static str, got: &Value) -> EngineError {
    EngineError::FieldTypeMismatch {
        expected,
        actual: got.kind(),
    }
}

/// Count the points of the window. Emits even for an empty window.
pub fn map_count(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut n = 0u64;
    while itr.next().is_some() {
        n += 1;
    }
    e.emit(Key::new(tmin, itr.tags()), Value::from(n as f64))
}

/// Sum the values of the window. Emits even for an empty window.
pub fn map_sum(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut n = 0.0;
    while let Some(p) = itr.next() {
        n += numeric(&p)?;
    }
    e.emit(Key::new(tmin, itr.tags()), Value::from(n))
}

/// Sum the partial sums (or counts) gathered for one key
pub fn reduce_sum(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut n = 0.0;
    for v in values {
        n += v.as_f64()?;
    }
    e.emit(key.clone(), Value::from(n))
}

/// Gather the count and sum of the window
pub fn map_mean(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut count = 0u64;
    let mut sum = 0.0;
    while let Some(p) = itr.next() {
        count += 1;
        sum += numeric(&p)?;
    }
    if count > 0 {
        e.emit(Key::new(tmin, itr.tags()), Value::MeanState { count, sum })?;
    }
    Ok(())
}

/// Combine partial means; emits nothing when no window had points
pub fn reduce_mean(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut count = 0u64;
    let mut sum = 0.0;
    for v in values {
        match v {
            Value::MeanState { count: c, sum: s } => {
                count += c;
                sum += s;
            }
            other => return Err(state_mismatch("mean state", &other)),
        }
    }
    if count > 0 {
        e.emit(key.clone(), Value::from(sum / count as f64))?;
    }
    Ok(())
}

/// Minimum value of the window, when any point is present
pub fn map_min(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut min = f64::INFINITY;
    let mut yielded = false;
    while let Some(p) = itr.next() {
        min = min.min(numeric(&p)?);
        yielded = true;
    }
    if yielded {
        e.emit(Key::new(tmin, itr.tags()), Value::from(min))?;
    }
    Ok(())
}

/// Global minimum across shards
pub fn reduce_min(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut min = f64::INFINITY;
    let mut yielded = false;
    for v in values {
        min = min.min(v.as_f64()?);
        yielded = true;
    }
    if yielded {
        e.emit(key.clone(), Value::from(min))?;
    }
    Ok(())
}

/// Maximum value of the window, when any point is present
pub fn map_max(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut max = f64::NEG_INFINITY;
    let mut yielded = false;
    while let Some(p) = itr.next() {
        max = max.max(numeric(&p)?);
        yielded = true;
    }
    if yielded {
        e.emit(Key::new(tmin, itr.tags()), Value::from(max))?;
    }
    Ok(())
}

/// Global maximum across shards
pub fn reduce_max(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut max = f64::NEG_INFINITY;
    let mut yielded = false;
    for v in values {
        max = max.max(v.as_f64()?);
        yielded = true;
    }
    if yielded {
        e.emit(key.clone(), Value::from(max))?;
    }
    Ok(())
}

/// Min and max of the window, when any point is present
pub fn map_spread(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut yielded = false;
    while let Some(p) = itr.next() {
        let v = numeric(&p)?;
        min = min.min(v);
        max = max.max(v);
        yielded = true;
    }
    if yielded {
        e.emit(Key::new(tmin, itr.tags()), Value::SpreadState { min, max })?;
    }
    Ok(())
}

/// Global max − min across shards
pub fn reduce_spread(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut yielded = false;
    for v in values {
        match v {
            Value::SpreadState { min: lo, max: hi } => {
                min = min.min(lo);
                max = max.max(hi);
                yielded = true;
            }
            other => return Err(state_mismatch("spread state", &other)),
        }
    }
    if yielded {
        e.emit(key.clone(), Value::from(max - min))?;
    }
    Ok(())
}

/// Collect raw samples, flushed in batches to bound mapper-side memory
pub fn map_stddev(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut samples = Vec::new();
    while let Some(p) = itr.next() {
        samples.push(numeric(&p)?);
        if samples.len() == EMIT_BATCH_SIZE {
            e.emit(
                Key::new(tmin, itr.tags()),
                Value::Samples(std::mem::take(&mut samples)),
            )?;
        }
    }
    if !samples.is_empty() {
        e.emit(Key::new(tmin, itr.tags()), Value::Samples(samples))?;
    }
    Ok(())
}

/// Sample standard deviation across all batches. A single sample has no
/// deviation and reduces to the literal string `"undefined"`.
pub fn reduce_stddev(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut data = Vec::new();
    for v in values {
        match v {
            Value::Samples(mut batch) => data.append(&mut batch),
            other => return Err(state_mismatch("sample batch", &other)),
        }
    }
    if data.is_empty() {
        return Ok(());
    }
    if data.len() == 1 {
        return e.emit(key.clone(), Value::Field(FieldValue::String("undefined".into())));
    }

    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let variance = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    e.emit(key.clone(), Value::from(variance.sqrt()))
}

/// Value with the smallest timestamp in the window
pub fn map_first(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut out: Option<(i64, FieldValue)> = None;
    while let Some(p) = itr.next() {
        match &out {
            Some((time, _)) if p.timestamp >= *time => {}
            _ => out = Some((p.timestamp, p.value)),
        }
    }
    if let Some((time, value)) = out {
        e.emit(Key::new(tmin, itr.tags()), Value::TimedState { time, value })?;
    }
    Ok(())
}

/// Value with the globally smallest timestamp
pub fn reduce_first(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut out: Option<(i64, FieldValue)> = None;
    for v in values {
        match v {
            Value::TimedState { time, value } => match &out {
                Some((t, _)) if time >= *t => {}
                _ => out = Some((time, value)),
            },
            other => return Err(state_mismatch("timed state", &other)),
        }
    }
    if let Some((_, value)) = out {
        e.emit(key.clone(), Value::Field(value))?;
    }
    Ok(())
}

/// Value with the largest timestamp in the window
pub fn map_last(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut out: Option<(i64, FieldValue)> = None;
    while let Some(p) = itr.next() {
        match &out {
            Some((time, _)) if p.timestamp <= *time => {}
            _ => out = Some((p.timestamp, p.value)),
        }
    }
    if let Some((time, value)) = out {
        e.emit(Key::new(tmin, itr.tags()), Value::TimedState { time, value })?;
    }
    Ok(())
}

/// Value with the globally largest timestamp
pub fn reduce_last(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut out: Option<(i64, FieldValue)> = None;
    for v in values {
        match v {
            Value::TimedState { time, value } => match &out {
                Some((t, _)) if time <= *t => {}
                _ => out = Some((time, value)),
            },
            other => return Err(state_mismatch("timed state", &other)),
        }
    }
    if let Some((_, value)) = out {
        e.emit(key.clone(), Value::Field(value))?;
    }
    Ok(())
}

/// Echo every value of the window; the percentile reducer re-extracts them
pub fn map_echo(itr: &mut BufferedIterator, e: &Emitter, tmin: i64) -> Result<()> {
    let mut values = Vec::new();
    while let Some(p) = itr.next() {
        values.push(p.value);
    }
    e.emit(Key::new(tmin, itr.tags()), Value::Echo(values))
}

/// Build the reducer for `percentile(field, p)`.
///
/// Index formula: `floor(len · p / 100 + 0.5) − 1`; an out-of-range index
/// (including empty input) reduces to `0.0`, exactly one emission per key.
pub fn reduce_percentile(percentile: f64) -> ReduceFn {
    Arc::new(move |key: &Key, values: Vec<Value>, e: &Emitter| {
        let mut all = Vec::new();
        for v in values {
            match v {
                Value::Echo(echoed) => {
                    for fv in echoed {
                        all.push(fv.as_f64().ok_or(EngineError::FieldTypeMismatch {
                            expected: "float",
                            actual: "non-numeric echoed value",
                        })?);
                    }
                }
                other => return Err(state_mismatch("echoed values", &other)),
            }
        }

        all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = (all.len() as f64 * percentile / 100.0 + 0.5).floor() as isize - 1;
        if index < 0 || index as usize >= all.len() {
            return e.emit(key.clone(), Value::from(0.0));
        }
        e.emit(key.clone(), Value::from(all[index as usize]))
    })
}

/// Collect undecoded points, flushed in batches, keyed at timestamp zero
pub fn map_raw(itr: &mut BufferedIterator, e: &Emitter, _tmin: i64) -> Result<()> {
    let mut points = Vec::new();
    while let Some(p) = itr.next() {
        points.push(RawPoint {
            timestamp: p.timestamp,
            raw: p.raw,
        });
        if points.len() == EMIT_BATCH_SIZE {
            e.emit(
                Key::new(0, itr.tags()),
                Value::RawBatch(std::mem::take(&mut points)),
            )?;
        }
    }
    if !points.is_empty() {
        e.emit(Key::new(0, itr.tags()), Value::RawBatch(points))?;
    }
    Ok(())
}

/// Merge raw batches across shards into one timestamp-sorted batch
pub fn reduce_raw(key: &Key, values: Vec<Value>, e: &Emitter) -> Result<()> {
    let mut all = Vec::new();
    for v in values {
        match v {
            Value::RawBatch(mut batch) => all.append(&mut batch),
            other => return Err(state_mismatch("raw batch", &other)),
        }
    }
    all.sort_by_key(|p| p.timestamp);
    e.emit(Key::new(0, key.values.clone()), Value::RawBatch(all))
}

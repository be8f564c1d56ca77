//! Mapper stage: interval-aligned bucketing over one point iterator

use crate::emit::{BatchReceiver, Emitter};
use crate::error::{EngineError, Result};
use crate::tx::PointIterator;
use std::sync::Arc;
use std::thread;
use timeflow_core::{Point, TagSet};
use tracing::debug;

/// A map function drains the points of one interval window from the
/// iterator and emits zero or more keyed intermediates.
pub type MapFn = Arc<dyn Fn(&mut BufferedIterator, &Emitter, i64) -> Result<()> + Send + Sync>;

/// A point iterator with one-slot pushback and an inclusive upper bound.
///
/// When an upper bound is set, a point beyond it is stashed and `next`
/// reports end-of-window; the stashed point becomes visible again once the
/// bound moves past it. End-of-source is tracked separately so that empty
/// windows between populated ones do not terminate the mapper loop.
pub struct BufferedIterator {
    itr: Box<dyn PointIterator>,
    tmax: Option<i64>,
    buf: Option<Point>,
    source_done: bool,
}

impl BufferedIterator {
    /// Wrap an iterator
    pub fn new(itr: Box<dyn PointIterator>) -> Self {
        Self {
            itr,
            tmax: None,
            buf: None,
            source_done: false,
        }
    }

    /// The encoded tag values of the underlying series
    pub fn tags(&self) -> TagSet {
        self.itr.tags()
    }

    /// Set the inclusive upper bound for subsequent reads
    pub fn set_tmax(&mut self, tmax: i64) {
        self.tmax = Some(tmax);
    }

    fn fill(&mut self) {
        if self.buf.is_none() && !self.source_done {
            match self.itr.next() {
                Some(p) => self.buf = Some(p),
                None => self.source_done = true,
            }
        }
    }

    /// The next point within the current window, if any
    pub fn next(&mut self) -> Option<Point> {
        self.fill();
        match (&self.buf, self.tmax) {
            // Beyond the window: leave it stashed for the next window.
            (Some(p), Some(tmax)) if p.timestamp > tmax => None,
            _ => self.buf.take(),
        }
    }

    /// Timestamp of the next point regardless of the window bound
    pub fn peek_timestamp(&mut self) -> Option<i64> {
        self.fill();
        self.buf.as_ref().map(|p| p.timestamp)
    }

    /// True once the underlying source is exhausted and nothing is stashed
    pub fn at_end(&mut self) -> bool {
        self.fill();
        self.buf.is_none() && self.source_done
    }
}

/// Drives one map function over one iterator on a worker thread.
pub struct Mapper {
    map_fn: MapFn,
    itr: Box<dyn PointIterator>,
    interval: i64,
    capacity: usize,
}

impl Mapper {
    /// Create a mapper for one iterator
    pub fn new(map_fn: MapFn, itr: Box<dyn PointIterator>, interval: i64, capacity: usize) -> Self {
        Self {
            map_fn,
            itr,
            interval,
            capacity,
        }
    }

    /// Start the map loop in the background and return its output channel
    pub fn start(self) -> BatchReceiver {
        let (emitter, rx) = Emitter::bounded(self.capacity);
        let Mapper {
            map_fn,
            itr,
            interval,
            ..
        } = self;
        thread::spawn(move || {
            let mut itr = BufferedIterator::new(itr);
            if let Err(e) = run_map_loop(&map_fn, &mut itr, interval, &emitter) {
                match e {
                    EngineError::Cancelled => debug!("mapper stopped: consumer gone"),
                    e => emitter.fail(e),
                }
            }
        });
        rx
    }
}

fn run_map_loop(
    map_fn: &MapFn,
    itr: &mut BufferedIterator,
    interval: i64,
    emitter: &Emitter,
) -> Result<()> {
    // Align the first window start to the interval grid.
    let mut tmin = 0i64;
    if interval > 0 {
        if let Some(ts) = itr.peek_timestamp() {
            tmin = ts - ts % interval;
        }
    }

    loop {
        if interval > 0 {
            itr.set_tmax(tmin + interval - 1);
        }
        if itr.at_end() {
            break;
        }
        map_fn.as_ref()(itr, emitter, tmin)?;
        tmin += interval;
    }
    Ok(())
}

//! Processors: sources of reduced batches
//!
//! A processor owns some background activity that feeds batches into a
//! channel. Reducers are the workhorse processors; the two others exist for
//! binary field expressions: `BinaryExprEvaluator` joins two processors
//! under an arithmetic operator, and `LiteralProcessor` keeps the constant
//! side of such an expression in lockstep forever.

use crate::emit::{Batch, BatchReceiver, Emitter, Key};
use crate::error::{EngineError, Result};
use crate::statement::BinaryOp;
use crate::value::Value;
use std::thread;
use timeflow_core::FieldValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A source of reduced batches.
///
/// `process` starts the background work and hands over the output channel;
/// the processor terminates by closing it. (The original capability split
/// into separate start and output accessors collapses here because the
/// receiver is owned.)
pub trait Processor: Send {
    /// Start background work and return the output channel
    fn process(&mut self) -> BatchReceiver;

    /// Source name reported on rows built from this processor
    fn name(&self) -> &str {
        ""
    }

    /// True when this processor emits undecoded raw-query batches
    fn is_raw(&self) -> bool {
        false
    }
}

/// Repeatedly offers a constant value under the zero key.
///
/// The emit loop ends when the consumer drops the receiver or when the
/// cancellation token fires. `stop` gives callers a synchronous handshake:
/// after it returns the worker thread has exited. Callers must release the
/// output receiver before stopping, otherwise a blocked send would hold the
/// worker alive.
pub struct LiteralProcessor {
    value: FieldValue,
    capacity: usize,
    token: CancellationToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl LiteralProcessor {
    /// Create a literal processor for a constant value
    pub fn new(value: FieldValue, capacity: usize, token: CancellationToken) -> Self {
        Self {
            value,
            capacity,
            token,
            handle: None,
        }
    }

    /// Cancel the emit loop and wait for the worker to exit
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Processor for LiteralProcessor {
    fn process(&mut self) -> BatchReceiver {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let value = Value::Field(self.value.clone());
        let token = self.token.clone();
        self.handle = Some(thread::spawn(move || {
            while !token.is_cancelled() {
                let mut batch = Batch::with_capacity(1);
                batch.insert(Key::default(), value.clone());
                if tx.blocking_send(Ok(batch)).is_err() {
                    break;
                }
            }
            debug!("literal processor stopped");
        }));
        rx
    }
}

impl Drop for LiteralProcessor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Joins two child processors under an arithmetic operator.
///
/// Reads exactly one batch from each child per tick, so both children must
/// produce at the same rate; constant operands are wrapped in
/// `LiteralProcessor` for precisely that reason. Either child closing closes
/// the output.
pub struct BinaryExprEvaluator {
    op: BinaryOp,
    lhs: Box<dyn Processor>,
    rhs: Box<dyn Processor>,
    capacity: usize,
    token: CancellationToken,
}

impl BinaryExprEvaluator {
    /// Combine two processors under an operator
    pub fn new(
        op: BinaryOp,
        lhs: Box<dyn Processor>,
        rhs: Box<dyn Processor>,
        capacity: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            op,
            lhs,
            rhs,
            capacity,
            token,
        }
    }
}

impl Processor for BinaryExprEvaluator {
    fn process(&mut self) -> BatchReceiver {
        let lhs_rx = self.lhs.process();
        let rhs_rx = self.rhs.process();
        let (emitter, rx) = Emitter::bounded(self.capacity);
        let op = self.op;
        let token = self.token.clone();
        thread::spawn(move || run_binary_loop(op, lhs_rx, rhs_rx, emitter, token));
        rx
    }
}

fn run_binary_loop(
    op: BinaryOp,
    mut lhs_rx: BatchReceiver,
    mut rhs_rx: BatchReceiver,
    emitter: Emitter,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }
        let Some(lhs) = lhs_rx.blocking_recv() else {
            break;
        };
        let lhs = match lhs {
            Ok(batch) => batch,
            Err(e) => {
                emitter.fail(e);
                break;
            }
        };
        let Some(rhs) = rhs_rx.blocking_recv() else {
            break;
        };
        let rhs = match rhs {
            Ok(batch) => batch,
            Err(e) => {
                emitter.fail(e);
                break;
            }
        };

        let mut out = Batch::with_capacity(lhs.len() + rhs.len());
        let mut failed = None;
        for (key, lv) in &lhs {
            match eval(op, Some(lv), rhs.get(key)) {
                Ok(v) => {
                    out.insert(key.clone(), v);
                }
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }
        if failed.is_none() {
            for (key, rv) in &rhs {
                if out.contains_key(key) {
                    continue;
                }
                match eval(op, None, Some(rv)) {
                    Ok(v) => {
                        out.insert(key.clone(), v);
                    }
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
        }
        if let Some(e) = failed {
            emitter.fail(e);
            break;
        }
        if emitter.emit_batch(out).is_err() {
            break;
        }
    }
    // Dropping the child receivers here is what lets blocked producers
    // (literal processors in particular) observe the shutdown.
}

fn eval(op: BinaryOp, lhs: Option<&Value>, rhs: Option<&Value>) -> Result<Value> {
    let l = operand(op, lhs)?;
    let r = operand(op, rhs)?;
    let out = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        // Division by zero is defined as zero, not an error.
        BinaryOp::Div => {
            if r == 0.0 {
                0.0
            } else {
                l / r
            }
        }
        other => {
            return Err(EngineError::Operator {
                op: other.to_string(),
                operand: "float".to_string(),
            })
        }
    };
    Ok(Value::from(out))
}

fn operand(op: BinaryOp, v: Option<&Value>) -> Result<f64> {
    match v {
        // A key missing on one side reads as zero.
        None => Ok(0.0),
        Some(v) => v.as_f64().map_err(|_| EngineError::Operator {
            op: op.to_string(),
            operand: v.kind().to_string(),
        }),
    }
}

//! Executor and row assembly
//!
//! The executor owns the transaction and the per-field processors. It starts
//! every processor, assembles their batches into per-tagset rows on a worker
//! thread, and streams the finished rows in (name, tagset hash) order on a
//! bounded channel. The transaction closes only after the channel drains.

use crate::config::EngineConfig;
use crate::emit::{BatchReceiver, Key};
use crate::error::{EngineError, Result};
use crate::processor::Processor;
use crate::row::{sort_rows, Row, RowValue};
use crate::statement::SelectStatement;
use crate::tx::Transaction;
use crate::value::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::thread;
use timeflow_core::{FieldValue, TagSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Executes a planned statement and streams result rows.
pub struct Executor<T: Transaction> {
    tx: T,
    stmt: SelectStatement,
    processors: Vec<Box<dyn Processor>>,
    interval: i64,
    tag_keys: Vec<String>,
    token: CancellationToken,
    config: EngineConfig,
}

impl<T: Transaction> std::fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

impl<T: Transaction> Executor<T> {
    pub(crate) fn new(
        tx: T,
        stmt: SelectStatement,
        processors: Vec<Box<dyn Processor>>,
        interval: i64,
        tag_keys: Vec<String>,
        token: CancellationToken,
        config: EngineConfig,
    ) -> Self {
        Self {
            tx,
            stmt,
            processors,
            interval,
            tag_keys,
            token,
            config,
        }
    }

    /// The planned statement, with `raw` resolved
    pub fn statement(&self) -> &SelectStatement {
        &self.stmt
    }

    /// The group-by interval in nanoseconds (0 when not grouping by time)
    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// The ordered group-by tag keys
    pub fn tag_keys(&self) -> &[String] {
        &self.tag_keys
    }

    /// A handle that cancels this query's whole plan when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin execution and return the row channel.
    ///
    /// Rows arrive once all processors have finished; the channel closes
    /// after the last row. Dropping the receiver tears the plan down.
    pub fn execute(mut self) -> Result<mpsc::Receiver<Row>> {
        self.tx.open()?;

        let outputs: Vec<BatchReceiver> =
            self.processors.iter_mut().map(|p| p.process()).collect();
        info!(
            "executing {} with {} processor(s)",
            self.stmt.source.name,
            outputs.len()
        );

        let (row_tx, row_rx) = mpsc::channel(self.config.emitter_capacity.max(1));
        thread::spawn(move || self.run(outputs, row_tx));
        Ok(row_rx)
    }

    fn run(mut self, outputs: Vec<BatchReceiver>, row_tx: mpsc::Sender<Row>) {
        let result = self.assemble(outputs);

        // Tear the plan down before streaming: the receivers are gone at
        // this point, and cancelling stops any literal source still looping.
        self.token.cancel();

        match result {
            Ok(mut rows) => {
                for row in &mut rows {
                    row.normalize_times();
                }
                sort_rows(&mut rows);
                for row in rows {
                    if row_tx.blocking_send(row).is_err() {
                        debug!("row consumer gone, discarding remaining rows");
                        break;
                    }
                }
            }
            Err(e) => {
                // Partial rows are discarded; the stream carries exactly one
                // row naming the failure, then ends.
                let name = self
                    .processors
                    .first()
                    .map(|p| p.name().to_string())
                    .unwrap_or_default();
                let _ = row_tx.blocking_send(Row::error(name, &e));
            }
        }

        if let Err(e) = self.tx.close() {
            error!("failed to close transaction: {}", e);
        }
    }

    /// Combine batches from every processor into per-tagset rows. Returns
    /// when any processor closes its channel; remaining channels are
    /// disconnected by dropping them, which unblocks their producers.
    fn assemble(&self, mut outputs: Vec<BatchReceiver>) -> Result<Vec<Row>> {
        let is_raw = self.processors.first().map(|p| p.is_raw()).unwrap_or(false);
        let field_ids = if is_raw {
            self.tx.field_ids(&self.stmt.fields)?
        } else {
            Vec::new()
        };
        let name = self
            .processors
            .first()
            .map(|p| p.name().to_string())
            .unwrap_or_default();

        let mut rows: HashMap<TagSet, Row> = HashMap::new();
        'ticks: loop {
            if self.token.is_cancelled() {
                break;
            }
            for (i, rx) in outputs.iter_mut().enumerate() {
                let Some(batch) = rx.blocking_recv() else {
                    break 'ticks;
                };
                for (key, value) in batch? {
                    self.apply(&mut rows, &name, i, key, value, is_raw, &field_ids)?;
                }
            }
        }

        Ok(rows.into_values().collect())
    }

    /// Write one keyed value into its row, creating the row and a fresh
    /// value array as needed.
    fn apply(
        &self,
        rows: &mut HashMap<TagSet, Row>,
        name: &str,
        index: usize,
        key: Key,
        value: Value,
        is_raw: bool,
        field_ids: &[u8],
    ) -> Result<()> {
        let width = self.processors.len() + 1;
        let row = match rows.entry(key.values.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let decoded = key.values.decode()?;
                let tags: BTreeMap<String, String> =
                    self.tag_keys.iter().cloned().zip(decoded).collect();

                let mut columns = Vec::with_capacity(self.stmt.fields.len() + 1);
                columns.push("time".to_string());
                for (i, field) in self.stmt.fields.iter().enumerate() {
                    let field_name = field.name();
                    columns.push(if field_name.is_empty() {
                        format!("col{}", i)
                    } else {
                        field_name.to_string()
                    });
                }
                entry.insert(Row::new(name, tags, columns))
            }
        };

        if is_raw {
            let points = match value {
                Value::RawBatch(points) => points,
                other => {
                    return Err(EngineError::FieldTypeMismatch {
                        expected: "raw batch",
                        actual: other.kind(),
                    })
                }
            };
            let mut values = Vec::with_capacity(points.len());
            for p in points {
                let decoded = self.tx.decode_values(field_ids, p.timestamp, &p.raw);
                values.push(decoded.into_iter().map(RowValue::Field).collect());
            }
            row.values = values;
            return Ok(());
        }

        // Samples sharing a timestamp share one value array; a new timestamp
        // opens a fresh one.
        let needs_new = match row.values.last() {
            None => true,
            Some(last) => !matches!(
                last.first(),
                Some(RowValue::Field(fv)) if fv.as_i64() == Some(key.timestamp)
            ),
        };
        if needs_new {
            let mut array = vec![RowValue::Null; width];
            array[0] = RowValue::Field(FieldValue::Integer(key.timestamp));
            row.values.push(array);
        }
        if let Some(last) = row.values.last_mut() {
            if let Some(cell) = last.get_mut(index + 1) {
                *cell = RowValue::Field(value.into_field()?);
            }
        }
        Ok(())
    }
}

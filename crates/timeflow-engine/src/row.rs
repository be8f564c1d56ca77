//! Result rows

use chrono::{DateTime, Utc};
use fxhash::FxHasher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use timeflow_core::FieldValue;

/// One cell of a result row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RowValue {
    /// Unfilled column
    Null,
    /// The time column after normalization
    Time(DateTime<Utc>),
    /// A field value
    Field(FieldValue),
}

/// One result series: name, decoded tags, column names and value arrays.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<RowValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Row {
    /// Create an empty row for a series
    pub fn new(name: impl Into<String>, tags: BTreeMap<String, String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tags,
            columns,
            values: Vec::new(),
            err: None,
        }
    }

    /// Create the single row reported when a query fails mid-stream
    pub fn error(name: impl Into<String>, err: impl ToString) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            columns: Vec::new(),
            values: Vec::new(),
            err: Some(err.to_string()),
        }
    }

    /// Convert integer nanosecond time cells into UTC timestamps
    pub fn normalize_times(&mut self) {
        for values in &mut self.values {
            if let Some(first) = values.first_mut() {
                if let RowValue::Field(fv) = first {
                    if let Some(ns) = fv.as_i64() {
                        *first = RowValue::Time(DateTime::from_timestamp_nanos(ns));
                    }
                }
            }
        }
    }

    /// Hash of the tag key/value pairs. Tags have no meaningful sort order,
    /// so the final row ordering hashes them instead; any stable hash works
    /// as long as it is deterministic across shards.
    pub fn tags_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for (key, value) in &self.tags {
            key.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Sort rows by (name, tagset hash) ascending
pub fn sort_rows(rows: &mut [Row]) {
    rows.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.tags_hash().cmp(&b.tags_hash()))
    });
}

//! Core record definitions and the table-source contract.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::ForecastResult;
use crate::common::ids::SimpleHash;

/// Identifier of one independently forecast unit (e.g. a ticker symbol).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One observation. `value` is always finite.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub entity_id: EntityId,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Descriptive columns carried through untouched.
    pub extra: BTreeMap<String, String>,
}

impl Record {
    pub fn new(entity_id: impl Into<EntityId>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            value,
            extra: BTreeMap::new(),
        }
    }
}

/// Rows rejected or flagged while loading a table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_read: usize,
    pub bad_timestamp: usize,
    pub bad_value: usize,
    pub missing_entity: usize,
    /// Accepted rows whose value is zero or negative.
    pub non_positive: usize,
}

impl LoadStats {
    pub fn rejected(&self) -> usize {
        self.bad_timestamp + self.bad_value + self.missing_entity
    }
}

/// Flat, read-only input table.
#[derive(Clone, Debug, Default)]
pub struct RawTable {
    pub records: Vec<Record>,
    pub stats: LoadStats,
}

impl RawTable {
    pub fn new(records: Vec<Record>) -> Self {
        let stats = LoadStats {
            rows_read: records.len(),
            ..LoadStats::default()
        };
        Self { records, stats }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// All records of one entity, ascending by timestamp, one record per timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityGroup {
    pub entity_id: EntityId,
    pub records: Vec<Record>,
    /// Records dropped because an earlier one had the same timestamp.
    pub duplicates_dropped: usize,
}

impl EntityGroup {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.value).collect()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.records.iter().map(|r| r.timestamp).collect()
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    /// Fingerprint of the (timestamp, value) series.
    pub fn digest(&self) -> String {
        let mut hasher = SimpleHash::new();
        for r in &self.records {
            hasher.update(&r.timestamp.timestamp_millis().to_le_bytes());
            hasher.update_f64(r.value);
        }
        hasher.finish_hex()
    }
}

/// Dataset-level numbers logged after load.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSummary {
    pub entities: usize,
    pub records: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// Capability of the external data provider.
pub trait TableSource: Send + Sync {
    fn fetch(&self, dataset_id: &str) -> ForecastResult<RawTable>;
}

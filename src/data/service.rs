//! Entity partitioning: flat table to per-entity ordered series.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::common::error::{ForecastError, ForecastResult};

use super::domain::{EntityGroup, EntityId, RawTable, Record, TableSummary};

/// Per-entity series split by eligibility.
#[derive(Clone, Debug, Default)]
pub struct Partition {
    /// Entities with at least `min_records` records.
    pub eligible: BTreeMap<EntityId, EntityGroup>,
    /// Entities below the minimum; excluded from training.
    pub insufficient: BTreeMap<EntityId, EntityGroup>,
    pub min_records: usize,
}

impl Partition {
    pub fn entity_count(&self) -> usize {
        self.eligible.len() + self.insufficient.len()
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.eligible
            .values()
            .chain(self.insufficient.values())
            .map(|g| g.duplicates_dropped)
            .sum()
    }

    /// The eligible group for `entity`, or the reason it cannot be used.
    pub fn lookup(&self, entity: &EntityId) -> ForecastResult<&EntityGroup> {
        if let Some(group) = self.eligible.get(entity) {
            return Ok(group);
        }
        match self.insufficient.get(entity) {
            Some(group) => Err(insufficient(group, self.min_records)),
            None => Err(ForecastError::unavailable(
                entity.as_str(),
                "entity not present in the current dataset",
            )),
        }
    }

    /// One `InsufficientData` error per excluded entity, in id order.
    pub fn insufficient_errors(&self) -> Vec<(EntityId, ForecastError)> {
        self.insufficient
            .iter()
            .map(|(id, g)| (id.clone(), insufficient(g, self.min_records)))
            .collect()
    }
}

fn insufficient(group: &EntityGroup, required: usize) -> ForecastError {
    ForecastError::InsufficientData {
        entity: group.entity_id.to_string(),
        records: group.len(),
        required,
    }
}

/// Group records by entity, sort each group by time and drop repeated timestamps.
///
/// Every input record lands in exactly one group. Sorting is stable, so among
/// records sharing a timestamp the one that appeared first in the table is kept.
pub fn partition(table: &RawTable, min_records: usize) -> Partition {
    let mut buckets: BTreeMap<EntityId, Vec<Record>> = BTreeMap::new();
    for record in &table.records {
        buckets
            .entry(record.entity_id.clone())
            .or_default()
            .push(record.clone());
    }

    let mut out = Partition {
        min_records,
        ..Partition::default()
    };
    for (entity_id, mut records) in buckets {
        records.sort_by_key(|r| r.timestamp);
        let before = records.len();
        records.dedup_by_key(|r| r.timestamp);
        let duplicates_dropped = before - records.len();
        if duplicates_dropped > 0 {
            warn!(entity = %entity_id, duplicates_dropped, "duplicate timestamps resolved keep-first");
        }

        let group = EntityGroup {
            entity_id: entity_id.clone(),
            records,
            duplicates_dropped,
        };
        if group.len() < min_records {
            debug!(entity = %entity_id, records = group.len(), min_records, "entity flagged insufficient");
            out.insufficient.insert(entity_id, group);
        } else {
            out.eligible.insert(entity_id, group);
        }
    }

    info!(
        eligible = out.eligible.len(),
        insufficient = out.insufficient.len(),
        duplicates = out.duplicates_dropped(),
        "table partitioned"
    );
    out
}

/// Entity count, record count and time span of a table.
pub fn summarize(table: &RawTable) -> TableSummary {
    let mut entities: Vec<&EntityId> = table.records.iter().map(|r| &r.entity_id).collect();
    entities.sort();
    entities.dedup();
    TableSummary {
        entities: entities.len(),
        records: table.len(),
        first: table.records.iter().map(|r| r.timestamp).min(),
        last: table.records.iter().map(|r| r.timestamp).max(),
    }
}

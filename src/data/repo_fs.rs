//! CSV-backed table source rooted at `cfg.data_root`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::common::config::PipelineCfg;
use crate::common::error::{ForecastError, ForecastResult};
use crate::common::time;

use super::domain::{LoadStats, RawTable, Record, TableSource};

/// Column layout of the input table.
#[derive(Clone, Debug)]
pub struct ColumnMap {
    pub entity: String,
    pub timestamp: String,
    pub target: String,
}

impl ColumnMap {
    pub fn from_cfg(cfg: &PipelineCfg) -> Self {
        Self {
            entity: cfg.entity_column.clone(),
            timestamp: cfg.timestamp_column.clone(),
            target: cfg.target_column.clone(),
        }
    }
}

/// Reads `<root>/<dataset_id>` as a headered CSV file.
pub struct CsvTableSource {
    root: PathBuf,
    columns: ColumnMap,
}

impl CsvTableSource {
    pub fn new(cfg: &PipelineCfg) -> Self {
        Self {
            root: cfg.data_root.clone(),
            columns: ColumnMap::from_cfg(cfg),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>, columns: ColumnMap) -> Self {
        Self {
            root: root.into(),
            columns,
        }
    }

    /// Parse a CSV stream with this source's column layout.
    pub fn read_from<R: Read>(&self, reader: R) -> ForecastResult<RawTable> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?.clone();

        let find = |name: &str| {
            headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                ForecastError::InvalidInput(format!("missing required column `{name}`"))
            })
        };
        let entity_idx = find(&self.columns.entity)?;
        let ts_idx = find(&self.columns.timestamp)?;
        let value_idx = find(&self.columns.target)?;

        let mut stats = LoadStats::default();
        let mut records = Vec::new();

        for row in csv.records() {
            let row = row?;
            stats.rows_read += 1;

            let entity = row.get(entity_idx).map(str::trim).unwrap_or_default();
            if entity.is_empty() {
                stats.missing_entity += 1;
                continue;
            }
            let Some(timestamp) = row.get(ts_idx).and_then(time::parse_timestamp) else {
                stats.bad_timestamp += 1;
                continue;
            };
            let value = match row.get(value_idx).map(|v| v.trim().parse::<f64>()) {
                Some(Ok(v)) if v.is_finite() => v,
                _ => {
                    stats.bad_value += 1;
                    continue;
                }
            };
            if value <= 0.0 {
                stats.non_positive += 1;
            }

            let extra: BTreeMap<String, String> = headers
                .iter()
                .zip(row.iter())
                .enumerate()
                .filter(|(idx, _)| ![entity_idx, ts_idx, value_idx].contains(idx))
                .map(|(_, (h, v))| (h.to_string(), v.to_string()))
                .collect();

            records.push(Record {
                entity_id: entity.into(),
                timestamp,
                value,
                extra,
            });
        }

        Ok(RawTable { records, stats })
    }
}

impl TableSource for CsvTableSource {
    fn fetch(&self, dataset_id: &str) -> ForecastResult<RawTable> {
        let path = self.root.join(dataset_id);
        let file = File::open(&path).map_err(|e| ForecastError::io(&path, e))?;
        let table = self.read_from(BufReader::new(file))?;

        let stats = &table.stats;
        if stats.rejected() > 0 {
            warn!(
                path = %path.display(),
                bad_timestamp = stats.bad_timestamp,
                bad_value = stats.bad_value,
                missing_entity = stats.missing_entity,
                "rows rejected while loading table"
            );
        }
        if stats.non_positive > 0 {
            warn!(count = stats.non_positive, "zero or negative target values found");
        }
        info!(path = %path.display(), rows = table.len(), "table loaded");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> CsvTableSource {
        CsvTableSource::with_root(
            ".",
            ColumnMap {
                entity: "Ticker".into(),
                timestamp: "Date".into(),
                target: "Close".into(),
            },
        )
    }

    #[test]
    fn maps_columns_and_passes_extras_through() {
        let csv = "Date,Open,Close,Ticker,Country\n\
                   2024-01-02,1.0,2.5,AAPL,usa\n\
                   2024-01-03,1.5,2.75,AAPL,usa\n";
        let table = source().read_from(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        let first = &table.records[0];
        assert_eq!(first.entity_id.as_str(), "AAPL");
        assert_eq!(first.value, 2.5);
        assert_eq!(first.extra.get("Country").map(String::as_str), Some("usa"));
        assert_eq!(first.extra.get("Open").map(String::as_str), Some("1.0"));
        assert!(!first.extra.contains_key("Close"));
    }

    #[test]
    fn rejects_and_counts_bad_rows() {
        let csv = "Date,Close,Ticker\n\
                   not-a-date,1.0,A\n\
                   2024-01-02,NaN,A\n\
                   2024-01-02,abc,A\n\
                   2024-01-02,1.0,\n\
                   2024-01-03,-1.0,A\n";
        let table = source().read_from(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.stats.rows_read, 5);
        assert_eq!(table.stats.bad_timestamp, 1);
        assert_eq!(table.stats.bad_value, 2);
        assert_eq!(table.stats.missing_entity, 1);
        assert_eq!(table.stats.non_positive, 1);
    }

    #[test]
    fn missing_required_column_is_invalid_input() {
        let err = source().read_from("Date,Ticker\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput(msg) if msg.contains("Close")));
    }

    #[test]
    fn fetch_reports_missing_file_as_io() {
        let dir = tempfile::tempdir().unwrap();
        let src = CsvTableSource::with_root(dir.path(), source().columns.clone());
        assert!(matches!(src.fetch("nope.csv"), Err(ForecastError::Io { .. })));
    }
}

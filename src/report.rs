//! Report persistence (CSV) and console tables.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tracing::info;

use crate::common::error::{ForecastError, ForecastResult};
use crate::evaluation::domain::EvaluationReport;
use crate::training::domain::{TaskFailure, TrainingReport};

pub const PERFORMANCE_FILE: &str = "model_performance.csv";
pub const EVALUATION_FAILURES_FILE: &str = "evaluation_failures.csv";
pub const TRAINING_REPORT_FILE: &str = "training_report.csv";

const PERFORMANCE_HEADER: [&str; 5] = [
    "entity_id",
    "test_error",
    "next_timestamp",
    "next_value_prediction",
    "accuracy",
];

/// Dates print as `YYYY-MM-DD`, anything with a time of day as RFC 3339.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    if ts.num_seconds_from_midnight() == 0 && ts.nanosecond() == 0 {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.to_rfc3339()
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[derive(Serialize)]
struct PerformanceRow<'a> {
    entity_id: &'a str,
    test_error: f64,
    next_timestamp: String,
    next_value_prediction: f64,
    accuracy: f64,
}

#[derive(Serialize)]
struct FailureRow<'a> {
    entity_id: &'a str,
    code: &'static str,
    reason: &'a str,
}

#[derive(Serialize)]
struct TrainingRow<'a> {
    entity_id: &'a str,
    status: &'static str,
    code: &'static str,
    train_samples: Option<usize>,
    test_samples: Option<usize>,
    test_mse: Option<f64>,
    epochs_run: Option<usize>,
    best_epoch: Option<usize>,
    storage_key: Option<&'a str>,
    reason: Option<&'a str>,
}

/// Write `rows` under an explicit header, so an empty file still has one.
fn write_csv<R: Serialize>(
    path: &Path,
    header: &[&str],
    rows: impl IntoIterator<Item = R>,
) -> ForecastResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ForecastError::io(parent, e))?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| ForecastError::io(path, e))
}

/// `model_performance.csv`: one row per evaluated entity, best first.
pub fn write_performance(dir: &Path, report: &EvaluationReport) -> ForecastResult<PathBuf> {
    let path = dir.join(PERFORMANCE_FILE);
    let rows = report.records.iter().map(|r| PerformanceRow {
        entity_id: r.entity_id.as_str(),
        test_error: r.test_error,
        next_timestamp: format_timestamp(&r.next_timestamp),
        next_value_prediction: r.next_value_prediction,
        accuracy: round4(r.accuracy),
    });
    write_csv(&path, &PERFORMANCE_HEADER, rows)?;
    info!(path = %path.display(), rows = report.records.len(), "performance report written");
    Ok(path)
}

fn failure_row(f: &TaskFailure) -> FailureRow<'_> {
    FailureRow {
        entity_id: f.entity_id.as_str(),
        code: f.code.as_str(),
        reason: &f.reason,
    }
}

pub fn write_evaluation_failures(dir: &Path, report: &EvaluationReport) -> ForecastResult<PathBuf> {
    let path = dir.join(EVALUATION_FAILURES_FILE);
    write_csv(
        &path,
        &["entity_id", "code", "reason"],
        report.failures.iter().map(failure_row),
    )?;
    Ok(path)
}

fn unsuccessful_row<'a>(f: &'a TaskFailure, status: &'static str) -> TrainingRow<'a> {
    TrainingRow {
        entity_id: f.entity_id.as_str(),
        status,
        code: f.code.as_str(),
        train_samples: None,
        test_samples: None,
        test_mse: None,
        epochs_run: None,
        best_epoch: None,
        storage_key: None,
        reason: Some(&f.reason),
    }
}

/// `training_report.csv`: successes (ranked), then failures, then skipped entities.
pub fn write_training_report(dir: &Path, report: &TrainingReport) -> ForecastResult<PathBuf> {
    let path = dir.join(TRAINING_REPORT_FILE);
    let ok = report.successes.iter().map(|m| TrainingRow {
        entity_id: m.entity_id.as_str(),
        status: "trained",
        code: "ok",
        train_samples: Some(m.train_samples),
        test_samples: Some(m.test_samples),
        test_mse: Some(m.test_mse),
        epochs_run: Some(m.epochs_run),
        best_epoch: Some(m.best_epoch),
        storage_key: Some(&m.storage_key),
        reason: None,
    });
    let rows = ok
        .chain(report.failures.iter().map(|f| unsuccessful_row(f, "failed")))
        .chain(report.skipped.iter().map(|f| unsuccessful_row(f, "skipped")));
    write_csv(
        &path,
        &[
            "entity_id",
            "status",
            "code",
            "train_samples",
            "test_samples",
            "test_mse",
            "epochs_run",
            "best_epoch",
            "storage_key",
            "reason",
        ],
        rows,
    )?;
    info!(path = %path.display(), rows = report.attempted(), "training report written");
    Ok(path)
}

/// Box-drawn table with left-aligned first column(s) and right-aligned numbers.
struct Table {
    headers: Vec<&'static str>,
    left: usize,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(headers: Vec<&'static str>, left: usize) -> Self {
        Self {
            headers,
            left,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self) -> String {
        let widths: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                self.rows
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain([h.chars().count()])
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let rule = |l: &str, m: &str, r: &str| {
            let parts: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("  {l}{}{r}\n", parts.join(m))
        };
        let line = |cells: Vec<&str>| {
            let parts: Vec<String> = cells
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (c, w))| {
                    let w = *w;
                    if i < self.left {
                        format!(" {c:<w$} ")
                    } else {
                        format!(" {c:>w$} ")
                    }
                })
                .collect();
            format!("  │{}│\n", parts.join("│"))
        };

        let mut out = rule("┌", "┬", "┐");
        out.push_str(&line(self.headers.clone()));
        out.push_str(&rule("├", "┼", "┤"));
        for row in &self.rows {
            out.push_str(&line(row.iter().map(String::as_str).collect()));
        }
        out.push_str(&rule("└", "┴", "┘"));
        out
    }
}

fn failure_lines(out: &mut String, title: &str, failures: &[TaskFailure]) {
    if failures.is_empty() {
        return;
    }
    out.push_str(&format!("\n  {title}:\n"));
    for f in failures {
        out.push_str(&format!("    {} [{}] {}\n", f.entity_id, f.code, f.reason));
    }
}

pub fn render_training(report: &TrainingReport) -> String {
    let mut table = Table::new(
        vec!["Entity", "Train", "Test", "Test MSE", "Epochs", "Preview (pred/actual)"],
        1,
    );
    for m in &report.successes {
        let preview = m
            .preview
            .first()
            .map(|(p, a)| format!("{p:.4}/{a:.4}"))
            .unwrap_or_default();
        table.push(vec![
            m.entity_id.to_string(),
            m.train_samples.to_string(),
            m.test_samples.to_string(),
            format!("{:.6}", m.test_mse),
            format!("{}/{}", m.best_epoch, m.epochs_run),
            preview,
        ]);
    }

    let mut out = format!(
        "\n  Training: {} trained, {} failed, {} skipped\n",
        report.successes.len(),
        report.failures.len(),
        report.skipped.len()
    );
    if !report.successes.is_empty() {
        out.push_str(&table.render());
    }
    failure_lines(&mut out, "Failed", &report.failures);
    failure_lines(&mut out, "Skipped", &report.skipped);
    out
}

pub fn render_evaluation(report: &EvaluationReport) -> String {
    let mut table = Table::new(
        vec![
            "Rank", "Entity", "Test MSE", "Train MSE", "Accuracy", "Last", "Next date", "Forecast",
            "Dir",
        ],
        2,
    );
    for (i, r) in report.records.iter().enumerate() {
        table.push(vec![
            (i + 1).to_string(),
            r.entity_id.to_string(),
            format!("{:.6}", r.test_error),
            format!("{:.6}", r.train_error),
            format!("{:.4}", r.accuracy),
            format!("{:.4}", r.last_value),
            format_timestamp(&r.next_timestamp),
            format!("{:.4}", r.next_value_prediction),
            r.direction().as_str().to_string(),
        ]);
    }

    let mut out = format!(
        "\n  Evaluation: {} evaluated, {} failed\n",
        report.records.len(),
        report.failures.len()
    );
    if !report.records.is_empty() {
        out.push_str(&table.render());
    }
    failure_lines(&mut out, "Not evaluated", &report.failures);
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::common::error::FailureCode;
    use crate::evaluation::domain::{accuracy, EvaluationRecord};
    use crate::training::domain::TrainMetrics;

    fn record(entity: &str, err: f64) -> EvaluationRecord {
        EvaluationRecord {
            entity_id: entity.into(),
            train_error: err / 2.0,
            test_error: err,
            next_timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            next_value_prediction: 101.5,
            last_value: 100.0,
            accuracy: accuracy(err),
        }
    }

    fn failure(entity: &str, code: FailureCode) -> TaskFailure {
        TaskFailure {
            entity_id: entity.into(),
            code,
            reason: "no data, try later".into(),
        }
    }

    #[test]
    fn performance_csv_has_exactly_the_published_columns() {
        let dir = tempfile::tempdir().unwrap();
        let report = EvaluationReport {
            records: vec![record("AAPL", 2.0), record("MSFT", 3.0)],
            failures: vec![failure("GONE", FailureCode::DataUnavailable)],
        };
        let path = write_performance(dir.path(), &report).unwrap();
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "entity_id,test_error,next_timestamp,next_value_prediction,accuracy");
        assert_eq!(lines[1], "AAPL,2.0,2024-03-01,101.5,0.3333");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn failure_csv_quotes_reasons_and_keeps_a_header_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = EvaluationReport {
            records: vec![],
            failures: vec![failure("GONE", FailureCode::DataUnavailable)],
        };
        let text = fs::read_to_string(write_evaluation_failures(dir.path(), &report).unwrap()).unwrap();
        assert_eq!(text, "entity_id,code,reason\nGONE,data_unavailable,\"no data, try later\"\n");

        let empty = EvaluationReport::default();
        let text = fs::read_to_string(write_performance(dir.path(), &empty).unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn training_csv_lists_every_attempted_entity() {
        let dir = tempfile::tempdir().unwrap();
        let report = TrainingReport {
            successes: vec![TrainMetrics {
                entity_id: "A".into(),
                train_samples: 56,
                test_samples: 14,
                test_mse: 0.5,
                epochs_run: 7,
                best_epoch: 3,
                storage_key: "lstm_A".into(),
                preview: vec![(1.0, 1.1)],
            }],
            failures: vec![failure("C", FailureCode::TrainingFailure)],
            skipped: vec![failure("B", FailureCode::InsufficientData)],
        };
        let text = fs::read_to_string(write_training_report(dir.path(), &report).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "A,trained,ok,56,14,0.5,7,3,lstm_A,");
        assert!(lines[2].starts_with("C,failed,training_failure,,,,,,,"));
        assert!(lines[3].starts_with("B,skipped,insufficient_data,"));

        let printed = render_training(&report);
        assert!(printed.contains("1 trained, 1 failed, 1 skipped"));
        assert!(printed.contains("B [insufficient_data]"));
    }

    #[test]
    fn evaluation_table_is_aligned() {
        let report = EvaluationReport {
            records: vec![record("A", 1.0), record("LONGNAME", 4.0)],
            failures: vec![],
        };
        let out = render_evaluation(&report);
        let widths: Vec<usize> = out
            .lines()
            .filter(|l| l.trim_start().starts_with(['┌', '│', '├', '└']))
            .map(|l| l.chars().count())
            .collect();
        assert_eq!(widths.len(), 6);
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
        assert!(out.contains("up"));
    }

    #[test]
    fn timestamps_print_as_dates_at_midnight() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(format_timestamp(&midnight), "2024-01-02");
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 15, 30, 0).unwrap();
        assert_eq!(format_timestamp(&later), "2024-01-02T15:30:00+00:00");
    }
}

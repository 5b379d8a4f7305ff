//! Evaluation of persisted artifacts against the current dataset.
//!
//! Every artifact is applied with the scaler stored alongside it. Nothing here
//! fits a scaler.

use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::common::config::PipelineCfg;
use crate::common::error::{ForecastError, ForecastResult};
use crate::common::time;
use crate::data::domain::{EntityGroup, EntityId, RawTable};
use crate::data::service::partition;
use crate::inference::service::{forecast_next, predict_original_units};
use crate::inference::workers::{run_isolated, Pool, Task};
use crate::prep::{scaling, window};
use crate::training::domain::{rank_by_error, ModelRegistry, TaskFailure, TaskOutcome};
use crate::training::model::ModelFactory;
use crate::training::service::mean_squared_error;

use super::domain::{accuracy, EvaluationRecord, EvaluationReport};

pub struct EvaluationEngine {
    cfg: Arc<PipelineCfg>,
    factory: Arc<dyn ModelFactory>,
    registry: Arc<dyn ModelRegistry>,
}

impl EvaluationEngine {
    pub fn new(
        cfg: Arc<PipelineCfg>,
        factory: Arc<dyn ModelFactory>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        Self {
            cfg,
            factory,
            registry,
        }
    }

    /// Evaluate every entity the registry knows about.
    pub fn run(&self, table: &RawTable) -> ForecastResult<EvaluationReport> {
        self.registry.ensure_ready()?;
        let start = time::now_ms();
        let known = self.registry.list()?;
        let parts = partition(table, self.cfg.min_records);

        let mut report = EvaluationReport::default();
        let mut tasks: Vec<(EntityId, Task<EvaluationRecord>)> = Vec::new();
        for id in known.into_iter().filter(|id| self.cfg.selects(id.as_str())) {
            let group = match parts.lookup(&id) {
                Ok(group) => group.clone(),
                Err(err) => {
                    report.failures.push(TaskFailure::from_error(id, &err));
                    continue;
                }
            };
            let cfg = self.cfg.clone();
            let factory = self.factory.clone();
            let registry = self.registry.clone();
            let task: Task<EvaluationRecord> = Box::new(move || {
                evaluate_entity(&group, &cfg, factory.as_ref(), registry.as_ref())
            });
            tasks.push((id, task));
        }
        info!(tasks = tasks.len(), unavailable = report.failures.len(), "evaluation batch started");

        if !tasks.is_empty() {
            let pool = Pool::new(self.cfg.workers.min(tasks.len()))?;
            for (_, outcome) in run_isolated(&pool, tasks)? {
                match outcome {
                    TaskOutcome::Success(record) => report.records.push(record),
                    TaskOutcome::Failure(failure) => report.failures.push(failure),
                }
            }
        }

        for f in &report.failures {
            warn!(entity = %f.entity_id, code = f.code.as_str(), reason = %f.reason, "evaluation failed");
        }
        report.failures.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        rank_by_error(&mut report.records, |r| (r.test_error, &r.entity_id));
        info!(
            evaluated = report.records.len(),
            failed = report.failures.len(),
            dur_ms = time::elapsed_ms(start) as u64,
            "evaluation batch finished"
        );
        Ok(report)
    }
}

/// Score one artifact on the entity's current series and forecast the next value.
pub fn evaluate_entity(
    group: &EntityGroup,
    cfg: &PipelineCfg,
    factory: &dyn ModelFactory,
    registry: &dyn ModelRegistry,
) -> ForecastResult<EvaluationRecord> {
    let entity = &group.entity_id;
    let span = info_span!("evaluate", entity = %entity);
    let _guard = span.enter();

    let artifact = registry.get(entity)?;
    if artifact.series_digest != group.digest() {
        info!(
            trained_on = artifact.train_samples + artifact.test_samples + artifact.window_len,
            records = group.len(),
            "series changed since training"
        );
    }
    let model = factory.restore(entity, &artifact.model)?;

    // Same split rule the artifact was trained with; the stored scaler is reused as is.
    let samples = window::build_windows(group, artifact.window_len)?;
    let raw = scaling::split(entity, samples, artifact.train_fraction)?;
    let scaled = scaling::apply(&artifact.scaler, &raw);

    let train_error = split_error(
        entity,
        &predict_original_units(model.as_ref(), &artifact.scaler, &scaled.train)?,
        &raw.train,
    )?;
    let test_error = split_error(
        entity,
        &predict_original_units(model.as_ref(), &artifact.scaler, &scaled.test)?,
        &raw.test,
    )?;

    let forecast = forecast_next(
        model.as_ref(),
        &artifact.scaler,
        group,
        artifact.window_len,
        cfg.forecast_horizon_days,
    )?;
    info!(mse = test_error, next = forecast.value, "entity evaluated");

    Ok(EvaluationRecord {
        entity_id: entity.clone(),
        train_error,
        test_error,
        next_timestamp: forecast.next_timestamp,
        next_value_prediction: forecast.value,
        last_value: forecast.last_value,
        accuracy: accuracy(test_error),
    })
}

fn split_error(
    entity: &EntityId,
    predicted: &[f64],
    raw: &[window::WindowedSample],
) -> ForecastResult<f64> {
    let actual: Vec<f64> = raw.iter().map(|s| s.label).collect();
    mean_squared_error(predicted, &actual)
        .filter(|m| m.is_finite())
        .ok_or_else(|| ForecastError::training(entity.as_str(), "evaluation error is not finite"))
}

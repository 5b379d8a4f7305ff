//! Batch training across entities.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::common::config::PipelineCfg;
use crate::common::error::ForecastResult;
use crate::common::time;
use crate::data::domain::{EntityId, RawTable};
use crate::data::service::{partition, Partition};
use crate::inference::workers::{run_isolated, Pool, Task};

use super::domain::{
    rank_by_error, ModelRegistry, TaskFailure, TaskOutcome, TrainMetrics, TrainingReport,
};
use super::model::ModelFactory;
use super::service::train_entity;

/// Runs one isolated training task per eligible entity.
pub struct TrainingOrchestrator {
    cfg: Arc<PipelineCfg>,
    factory: Arc<dyn ModelFactory>,
    registry: Arc<dyn ModelRegistry>,
}

impl TrainingOrchestrator {
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

    /// Train every selected entity of `table`.
    ///
    /// Only registry or pool failures are returned as errors; everything that
    /// goes wrong for a single entity ends up in the report.
    pub fn run(&self, table: &RawTable) -> ForecastResult<TrainingReport> {
        self.registry.ensure_ready()?;
        let start = time::now_ms();

        let parts = partition(table, self.cfg.min_records);
        let mut report = TrainingReport {
            skipped: self.skipped(&parts),
            ..TrainingReport::default()
        };
        for skip in &report.skipped {
            warn!(entity = %skip.entity_id, code = skip.code.as_str(), reason = %skip.reason, "entity skipped");
        }

        let tasks: Vec<(EntityId, Task<TrainMetrics>)> = parts
            .eligible
            .into_iter()
            .filter(|(id, _)| self.cfg.selects(id.as_str()))
            .map(|(id, group)| {
                // Each task owns its group and shares only read-only handles.
                let cfg = self.cfg.clone();
                let factory = self.factory.clone();
                let registry = self.registry.clone();
                let task: Task<TrainMetrics> = Box::new(move || {
                    train_entity(&group, &cfg, factory.as_ref(), registry.as_ref())
                });
                (id, task)
            })
            .collect();
        info!(tasks = tasks.len(), workers = self.cfg.workers, "training batch started");

        if !tasks.is_empty() {
            let pool = Pool::new(self.cfg.workers.min(tasks.len()))?;
            for (entity, outcome) in run_isolated(&pool, tasks)? {
                match outcome {
                    TaskOutcome::Success(metrics) => report.successes.push(metrics),
                    TaskOutcome::Failure(failure) => {
                        error!(entity = %entity, code = failure.code.as_str(), reason = %failure.reason, "training failed");
                        report.failures.push(failure);
                    }
                }
            }
        }

        rank_by_error(&mut report.successes, |m| (m.test_mse, &m.entity_id));
        info!(
            succeeded = report.successes.len(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            dur_ms = time::elapsed_ms(start) as u64,
            "training batch finished"
        );
        Ok(report)
    }

    fn skipped(&self, parts: &Partition) -> Vec<TaskFailure> {
        parts
            .insufficient_errors()
            .into_iter()
            .filter(|(id, _)| self.cfg.selects(id.as_str()))
            .map(|(id, err)| TaskFailure::from_error(id, &err))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::common::error::{FailureCode, ForecastError};
    use crate::data::service::tests::daily;
    use crate::training::domain::ModelArtifact;
    use crate::training::model::LinearWindowFactory;
    use crate::training::repo_mem::MemoryModelRegistry;

    fn cfg() -> PipelineCfg {
        PipelineCfg {
            window_len: 10,
            min_records: 30,
            workers: 3,
            epochs: 3,
            batch_size: 8,
            ..PipelineCfg::default()
        }
    }

    fn series(n: usize, level: f64) -> Vec<f64> {
        (0..n).map(|i| level + (i as f64 * 0.3).sin()).collect()
    }

    struct BrokenRegistry;

    impl ModelRegistry for BrokenRegistry {
        fn ensure_ready(&self) -> ForecastResult<()> {
            Err(ForecastError::Registry("disk gone".into()))
        }
        fn put(&self, _: &ModelArtifact) -> ForecastResult<()> {
            unreachable!()
        }
        fn get(&self, e: &EntityId) -> ForecastResult<ModelArtifact> {
            Err(ForecastError::ArtifactNotFound(e.to_string()))
        }
        fn list(&self) -> ForecastResult<BTreeSet<EntityId>> {
            Ok(Default::default())
        }
        fn key_for(&self, e: &EntityId) -> String {
            e.to_string()
        }
    }

    #[test]
    fn partial_success_is_reported_and_ranked() {
        let cfg = Arc::new(cfg());
        let registry = Arc::new(MemoryModelRegistry::new("lstm"));
        let orch = TrainingOrchestrator::new(
            cfg.clone(),
            Arc::new(LinearWindowFactory::from_cfg(&cfg)),
            registry.clone(),
        );
        let mut records = daily("BIG", &series(60, 1_000.0));
        records.extend(daily("SMALL", &series(60, 1.0)));
        records.extend(daily("SHORT", &series(12, 5.0)));

        let report = orch.run(&RawTable::new(records)).unwrap();
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.successes.len(), 2);
        assert!(report.successes[0].test_mse <= report.successes[1].test_mse);
        assert_eq!(
            report.failure("SHORT").map(|f| f.code),
            Some(FailureCode::InsufficientData)
        );
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&"SHORT".into()).is_err());
    }

    #[test]
    fn allow_list_limits_the_batch() {
        let mut c = cfg();
        c.entities = Some(vec!["B".into()]);
        let cfg = Arc::new(c);
        let registry = Arc::new(MemoryModelRegistry::new("lstm"));
        let orch = TrainingOrchestrator::new(
            cfg.clone(),
            Arc::new(LinearWindowFactory::from_cfg(&cfg)),
            registry.clone(),
        );
        let mut records = daily("A", &series(40, 10.0));
        records.extend(daily("B", &series(40, 20.0)));

        let report = orch.run(&RawTable::new(records)).unwrap();
        assert_eq!(report.attempted(), 1);
        assert!(report.success("B").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unusable_registry_aborts_the_run() {
        let cfg = Arc::new(cfg());
        let orch = TrainingOrchestrator::new(
            cfg.clone(),
            Arc::new(LinearWindowFactory::from_cfg(&cfg)),
            Arc::new(BrokenRegistry),
        );
        let err = orch
            .run(&RawTable::new(daily("A", &series(40, 1.0))))
            .unwrap_err();
        assert!(err.is_fatal());
    }
}

//! Domain types for trained artifacts, the registry contract and task outcomes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::{FailureCode, ForecastError, ForecastResult};
use crate::common::ids;
use crate::data::domain::EntityId;
use crate::prep::scaling::ScalerState;

use super::model::{FitSummary, ModelParams};

/// Bumped whenever the persisted layout changes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Trained unit for one entity together with the scaler needed to read its output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub entity_id: EntityId,
    pub window_len: usize,
    pub train_fraction: f64,
    pub scaler: ScalerState,
    pub model: ModelParams,
    pub fit: FitSummary,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Held-out MSE in original units at training time.
    pub test_mse: f64,
    /// Digest of the series the model was trained on.
    pub series_digest: String,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Reject artifacts that cannot be applied safely.
    pub fn validate(&self, expected: &EntityId) -> ForecastResult<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ForecastError::InvalidInput(format!(
                "artifact format {} for {}, expected {ARTIFACT_FORMAT_VERSION}",
                self.format_version, self.entity_id
            )));
        }
        if &self.entity_id != expected {
            return Err(ForecastError::InvalidInput(format!(
                "artifact stored for {expected} belongs to {}",
                self.entity_id
            )));
        }
        if self.window_len == 0 || self.model.weights.len() != self.window_len {
            return Err(ForecastError::InvalidInput(format!(
                "artifact for {} has {} weights for a window of {}",
                self.entity_id,
                self.model.weights.len(),
                self.window_len
            )));
        }
        self.scaler.validate()
    }
}

/// Storage for one artifact per entity.
///
/// Implementations must tolerate concurrent `put` calls for different entities.
pub trait ModelRegistry: Send + Sync {
    /// Fail early if the backing store cannot be used at all.
    fn ensure_ready(&self) -> ForecastResult<()>;

    /// Create or replace the entity's artifact.
    fn put(&self, artifact: &ModelArtifact) -> ForecastResult<()>;

    /// `ArtifactNotFound` when nothing was persisted for `entity`.
    fn get(&self, entity: &EntityId) -> ForecastResult<ModelArtifact>;

    fn list(&self) -> ForecastResult<BTreeSet<EntityId>>;

    /// Storage key of `entity` in this registry.
    fn key_for(&self, entity: &EntityId) -> String;
}

/// Storage key shared by the registry implementations.
pub fn artifact_key(prefix: &str, entity: &EntityId) -> String {
    ids::storage_key(prefix, entity.as_str())
}

/// Metrics of one successful training task.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainMetrics {
    pub entity_id: EntityId,
    pub train_samples: usize,
    pub test_samples: usize,
    pub test_mse: f64,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub storage_key: String,
    /// First test-split (predicted, actual) pairs in original units.
    pub preview: Vec<(f64, f64)>,
}

/// Structured reason an entity produced no result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskFailure {
    pub entity_id: EntityId,
    pub code: FailureCode,
    pub reason: String,
}

impl TaskFailure {
    pub fn from_error(entity_id: EntityId, err: &ForecastError) -> Self {
        Self {
            entity_id,
            code: err.code(),
            reason: err.to_string(),
        }
    }
}

/// Tagged result of one per-entity task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome<T> {
    Success(T),
    Failure(TaskFailure),
}

impl<T> TaskOutcome<T> {
    pub fn from_result(entity_id: EntityId, result: ForecastResult<T>) -> Self {
        match result {
            Ok(v) => TaskOutcome::Success(v),
            Err(err) => TaskOutcome::Failure(TaskFailure::from_error(entity_id, &err)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

/// Aggregate of one training batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingReport {
    /// Ascending by test MSE.
    pub successes: Vec<TrainMetrics>,
    /// Tasks that ran and failed, by entity id.
    pub failures: Vec<TaskFailure>,
    /// Entities excluded before training, by entity id.
    pub skipped: Vec<TaskFailure>,
}

impl TrainingReport {
    pub fn attempted(&self) -> usize {
        self.successes.len() + self.failures.len() + self.skipped.len()
    }

    pub fn success(&self, entity: &str) -> Option<&TrainMetrics> {
        self.successes.iter().find(|m| m.entity_id.as_str() == entity)
    }

    pub fn failure(&self, entity: &str) -> Option<&TaskFailure> {
        self.failures
            .iter()
            .chain(&self.skipped)
            .find(|f| f.entity_id.as_str() == entity)
    }
}

/// Sort successes by ascending error, ties broken by entity id.
pub fn rank_by_error<T, F>(rows: &mut [T], key: F)
where
    F: Fn(&T) -> (f64, &EntityId),
{
    rows.sort_by(|a, b| {
        let (ea, ia) = key(a);
        let (eb, ib) = key(b);
        ea.total_cmp(&eb).then_with(|| ia.cmp(ib))
    });
}

//! Error handling primitives shared across the core.
//!
//! Per-entity failures (`InsufficientData`, `TrainingFailure`,
//! `ArtifactNotFound`, `DataUnavailable`) are caught at the task boundary and
//! turned into report rows. Only infrastructure failures are fatal to a run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Stable failure codes used in log fields and report rows.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// Entity has fewer records than a window pipeline needs.
    InsufficientData = 1,
    /// Fit, predict or numeric failure inside one entity's task.
    TrainingFailure = 2,
    /// No persisted artifact for the entity.
    ArtifactNotFound = 3,
    /// Entity is registered but its current series cannot be rebuilt.
    DataUnavailable = 4,
    /// Input failed validation.
    InvalidInput = 5,
    /// Storage, serialization or pool failure.
    Infrastructure = 6,
    /// Catch-all for bugs.
    Internal = 7,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Ok => "ok",
            FailureCode::InsufficientData => "insufficient_data",
            FailureCode::TrainingFailure => "training_failure",
            FailureCode::ArtifactNotFound => "artifact_not_found",
            FailureCode::DataUnavailable => "data_unavailable",
            FailureCode::InvalidInput => "invalid_input",
            FailureCode::Infrastructure => "infrastructure",
            FailureCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error type for the core.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("insufficient data for {entity}: {records} records, {required} required")]
    InsufficientData {
        entity: String,
        records: usize,
        required: usize,
    },

    #[error("training failed for {entity}: {reason}")]
    TrainingFailure { entity: String, reason: String },

    #[error("no artifact persisted for {0}")]
    ArtifactNotFound(String),

    #[error("data unavailable for {entity}: {reason}")]
    DataUnavailable { entity: String, reason: String },

    /// Scaler used outside its fit/apply contract. Never expected at runtime.
    #[error("scaling invariant violated: {0}")]
    ScalingInvariant(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("model registry unavailable: {0}")]
    Registry(String),

    #[error("worker pool failure: {0}")]
    Pool(String),
}

/// Result alias used throughout the crate.
pub type ForecastResult<T> = Result<T, ForecastError>;

impl ForecastError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn training(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TrainingFailure {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> FailureCode {
        match self {
            ForecastError::InsufficientData { .. } => FailureCode::InsufficientData,
            ForecastError::TrainingFailure { .. } => FailureCode::TrainingFailure,
            ForecastError::ArtifactNotFound(_) => FailureCode::ArtifactNotFound,
            ForecastError::DataUnavailable { .. } => FailureCode::DataUnavailable,
            ForecastError::InvalidInput(_) | ForecastError::Config(_) => FailureCode::InvalidInput,
            ForecastError::Io { .. }
            | ForecastError::Csv(_)
            | ForecastError::Serialization(_)
            | ForecastError::Registry(_)
            | ForecastError::Pool(_) => FailureCode::Infrastructure,
            ForecastError::ScalingInvariant(_) => FailureCode::Internal,
        }
    }

    /// Whether the error takes down the whole run rather than one entity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForecastError::Registry(_) | ForecastError::Pool(_) | ForecastError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FailureCode::Ok as u32, 0);
        assert_eq!(FailureCode::InsufficientData as u32, 1);
        assert_eq!(FailureCode::TrainingFailure as u32, 2);
        assert_eq!(FailureCode::ArtifactNotFound as u32, 3);
        assert_eq!(FailureCode::DataUnavailable as u32, 4);
        assert_eq!(FailureCode::InvalidInput as u32, 5);
        assert_eq!(FailureCode::Infrastructure as u32, 6);
        assert_eq!(FailureCode::Internal as u32, 7);
    }

    #[test]
    fn only_shared_infrastructure_is_fatal() {
        assert!(ForecastError::Registry("gone".into()).is_fatal());
        assert!(ForecastError::Pool("no threads".into()).is_fatal());
        assert!(!ForecastError::training("AAPL", "nan loss").is_fatal());
        assert!(!ForecastError::ArtifactNotFound("AAPL".into()).is_fatal());
    }

    #[test]
    fn per_entity_errors_map_to_their_codes() {
        let err = ForecastError::InsufficientData {
            entity: "B".into(),
            records: 50,
            required: 120,
        };
        assert_eq!(err.code(), FailureCode::InsufficientData);
        assert_eq!(
            err.to_string(),
            "insufficient data for B: 50 records, 120 required"
        );
        assert_eq!(
            ForecastError::unavailable("C", "removed").code().as_str(),
            "data_unavailable"
        );
    }
}

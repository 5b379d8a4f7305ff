//! Per-entity model training, the artifact registry and batch orchestration.

pub mod domain;
pub mod model;
pub mod orchestrator;
pub mod repo_fs;
pub mod repo_mem;
pub mod service;

pub use domain::{ModelArtifact, ModelRegistry, TaskFailure, TaskOutcome, TrainMetrics, TrainingReport};
pub use model::{Forecaster, LinearWindowFactory, ModelFactory};
pub use orchestrator::TrainingOrchestrator;
pub use repo_fs::FsModelRegistry;
pub use repo_mem::MemoryModelRegistry;

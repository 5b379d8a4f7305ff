//! Evaluation and next-step forecasting over the registry's artifacts.

pub mod domain;
pub mod service;

pub use domain::{accuracy, Direction, EvaluationRecord, EvaluationReport};
pub use service::EvaluationEngine;

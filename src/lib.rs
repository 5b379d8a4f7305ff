//! Per-entity time-series forecasting pipeline.
//!
//! A flat table of `(entity, timestamp, value)` records is partitioned per
//! entity, windowed, scaled on the train prefix only and used to train one
//! model per entity in parallel. Artifacts carry their scaler and are later
//! evaluated and used for a one-step-ahead forecast.

pub mod api;
pub mod common;
pub mod data;
pub mod evaluation;
pub mod inference;
pub mod prep;
pub mod report;
pub mod training;

pub use common::{FailureCode, ForecastError, ForecastResult, PipelineCfg};

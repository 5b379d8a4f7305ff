//! Applying trained units: batch prediction, next-step forecasts and the
//! worker pool the per-entity pipelines run on.

pub mod service;
pub mod workers;

pub use service::{forecast_next, Forecast};
pub use workers::{run_isolated, Pool, Task};

//! Logging setup: `tracing` events rendered as text or JSON lines.
//!
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::common::config::{LogFormat, PipelineCfg};
use crate::common::error::{ForecastError, ForecastResult};

/// Install the global subscriber. Fails if one is already installed.
pub fn init(cfg: &PipelineCfg) -> ForecastResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.log_level)
            .map_err(|e| ForecastError::Config(format!("log_level `{}`: {e}", cfg.log_level)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match cfg.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    installed.map_err(|e| ForecastError::Config(format!("logging already initialised: {e}")))
}

//! Runtime configuration: defaults, an optional TOML file, then the process
//! environment. Command-line overrides are applied on top by `api::cli`.
//!
//! The resulting [`PipelineCfg`] is an immutable value handed to every
//! component at construction; nothing reads configuration from globals.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::error::{ForecastError, ForecastResult};

/// Environment variable naming a TOML configuration file.
pub const CONFIG_ENV: &str = "TICKCAST_CONFIG";

const ENV_PREFIX: &str = "TICKCAST_";

/// Largest accepted window length.
pub const MAX_WINDOW_LEN: usize = 100_000;

/// Output format of the log subscriber.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

/// Snapshot of every knob consumed by the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineCfg {
    pub data_root: PathBuf,
    /// Dataset identifier handed to the table source (a file under `data_root`).
    pub dataset: String,
    /// Defaults to `<data_root>/models`.
    pub model_dir: Option<PathBuf>,
    pub report_dir: PathBuf,

    pub entity_column: String,
    pub timestamp_column: String,
    pub target_column: String,

    pub window_len: usize,
    pub train_fraction: f64,
    pub min_records: usize,
    pub workers: usize,

    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Epochs without validation improvement before stopping; 0 disables.
    pub early_stopping_patience: usize,
    /// Tail share of the train split used for early stopping, in `[0, 1)`.
    pub validation_fraction: f64,
    pub huber_delta: f64,
    pub scale_min: f64,
    pub scale_max: f64,

    pub artifact_prefix: String,
    pub forecast_horizon_days: i64,
    /// Restrict a run to these entity ids.
    pub entities: Option<Vec<String>>,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            dataset: "stock_data.csv".to_string(),
            model_dir: None,
            report_dir: PathBuf::from("./results"),
            entity_column: "Ticker".to_string(),
            timestamp_column: "Date".to_string(),
            target_column: "Close".to_string(),
            window_len: 60,
            train_fraction: 0.8,
            min_records: 120,
            workers: default_workers(),
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-3,
            early_stopping_patience: 5,
            validation_fraction: 0.1,
            huber_delta: 1.0,
            scale_min: 0.0,
            scale_max: 1.0,
            artifact_prefix: "lstm".to_string(),
            forecast_horizon_days: 1,
            entities: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl PipelineCfg {
    /// Build a configuration from defaults, an optional file and the environment.
    ///
    /// `file` wins over `TICKCAST_CONFIG`. The result is validated.
    pub fn load(file: Option<&Path>) -> ForecastResult<Self> {
        let from_env = env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut cfg = match file.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_toml_file(&path)?,
            None => Self::default(),
        };
        cfg.apply_env(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> ForecastResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ForecastError::io(path, e))?;
        Self::from_toml_str(&raw)
            .map_err(|e| ForecastError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(raw: &str) -> ForecastResult<Self> {
        toml::from_str(raw).map_err(|e| ForecastError::Config(e.to_string()))
    }

    /// Overlay `TICKCAST_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ForecastResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = get("DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = get("DATASET") {
            self.dataset = v;
        }
        if let Some(v) = get("MODEL_DIR") {
            self.model_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("REPORT_DIR") {
            self.report_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ENTITY_COLUMN") {
            self.entity_column = v;
        }
        if let Some(v) = get("TIMESTAMP_COLUMN") {
            self.timestamp_column = v;
        }
        if let Some(v) = get("TARGET_COLUMN") {
            self.target_column = v;
        }
        if let Some(v) = get("WINDOW_LEN") {
            self.window_len = parse_var("WINDOW_LEN", &v)?;
        }
        if let Some(v) = get("TRAIN_FRACTION") {
            self.train_fraction = parse_var("TRAIN_FRACTION", &v)?;
        }
        if let Some(v) = get("MIN_RECORDS") {
            self.min_records = parse_var("MIN_RECORDS", &v)?;
        }
        if let Some(v) = get("WORKERS") {
            self.workers = parse_var("WORKERS", &v)?;
        }
        if let Some(v) = get("EPOCHS") {
            self.epochs = parse_var("EPOCHS", &v)?;
        }
        if let Some(v) = get("BATCH_SIZE") {
            self.batch_size = parse_var("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("LEARNING_RATE") {
            self.learning_rate = parse_var("LEARNING_RATE", &v)?;
        }
        if let Some(v) = get("EARLY_STOPPING_PATIENCE") {
            self.early_stopping_patience = parse_var("EARLY_STOPPING_PATIENCE", &v)?;
        }
        if let Some(v) = get("VALIDATION_FRACTION") {
            self.validation_fraction = parse_var("VALIDATION_FRACTION", &v)?;
        }
        if let Some(v) = get("HUBER_DELTA") {
            self.huber_delta = parse_var("HUBER_DELTA", &v)?;
        }
        if let Some(v) = get("SCALE_MIN") {
            self.scale_min = parse_var("SCALE_MIN", &v)?;
        }
        if let Some(v) = get("SCALE_MAX") {
            self.scale_max = parse_var("SCALE_MAX", &v)?;
        }
        if let Some(v) = get("FORECAST_HORIZON_DAYS") {
            self.forecast_horizon_days = parse_var("FORECAST_HORIZON_DAYS", &v)?;
        }
        if let Some(v) = get("ARTIFACT_PREFIX") {
            self.artifact_prefix = v;
        }
        if let Some(v) = get("ENTITIES") {
            self.entities = Some(split_list(&v));
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.log_format = v.parse().map_err(ForecastError::Config)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ForecastResult<()> {
        if self.window_len == 0 || self.window_len > MAX_WINDOW_LEN {
            return Err(ForecastError::Config(format!(
                "window_len must lie in [1, {MAX_WINDOW_LEN}], got {}",
                self.window_len
            )));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(ForecastError::Config(format!(
                "train_fraction must lie in (0, 1), got {}",
                self.train_fraction
            )));
        }
        if self.workers == 0 {
            return Err(ForecastError::Config("workers must be positive".into()));
        }
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(ForecastError::Config(
                "epochs and batch_size must be positive".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ForecastError::Config("learning_rate must be positive".into()));
        }
        if !(self.validation_fraction >= 0.0 && self.validation_fraction < 1.0) {
            return Err(ForecastError::Config(format!(
                "validation_fraction must lie in [0, 1), got {}",
                self.validation_fraction
            )));
        }
        if !(self.huber_delta.is_finite() && self.huber_delta > 0.0) {
            return Err(ForecastError::Config("huber_delta must be positive".into()));
        }
        if !(self.scale_min.is_finite() && self.scale_max.is_finite())
            || self.scale_min >= self.scale_max
        {
            return Err(ForecastError::Config(format!(
                "scale range [{}, {}] is empty",
                self.scale_min, self.scale_max
            )));
        }
        if self.forecast_horizon_days < 1 {
            return Err(ForecastError::Config(
                "forecast_horizon_days must be at least 1".into(),
            ));
        }
        if self.artifact_prefix.is_empty() {
            return Err(ForecastError::Config("artifact_prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.data_root.join(&self.dataset)
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join("models"))
    }

    pub fn scale_range(&self) -> (f64, f64) {
        (self.scale_min, self.scale_max)
    }

    /// Whether `entity` passes the optional allow-list.
    pub fn selects(&self, entity: &str) -> bool {
        self.entities
            .as_ref()
            .map_or(true, |list| list.iter().any(|e| e == entity))
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> ForecastResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ForecastError::Config(format!("{ENV_PREFIX}{name}={raw}: {e}")))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

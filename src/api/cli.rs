//! Command line surface: `tickcast [flags] <train|evaluate|run>`.
//!
//! Flags override the configuration file and `TICKCAST_*` variables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use crate::common::config::PipelineCfg;
use crate::common::error::{ForecastError, ForecastResult};
use crate::common::log;
use crate::data::domain::{RawTable, TableSource};
use crate::data::repo_fs::CsvTableSource;
use crate::data::service::summarize;
use crate::evaluation::domain::EvaluationReport;
use crate::evaluation::service::EvaluationEngine;
use crate::report;
use crate::training::domain::{ModelRegistry, TrainingReport};
use crate::training::model::{LinearWindowFactory, ModelFactory};
use crate::training::orchestrator::TrainingOrchestrator;
use crate::training::repo_fs::FsModelRegistry;

/// Per-entity time-series training and forecasting.
#[derive(Parser, Debug)]
#[command(name = "tickcast")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Train one model per entity and persist the artifacts
    Train,
    /// Evaluate every persisted artifact and forecast the next value
    Evaluate,
    /// Train, then evaluate
    Run,
}

/// Configuration flags shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,

    /// Dataset file under the data root
    #[arg(long, global = true)]
    pub dataset: Option<String>,

    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub report_dir: Option<PathBuf>,

    /// Window length W
    #[arg(long, global = true)]
    pub window: Option<usize>,

    #[arg(long, global = true)]
    pub train_fraction: Option<f64>,

    #[arg(long, global = true)]
    pub min_records: Option<usize>,

    /// Worker pool size
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[arg(long, global = true)]
    pub epochs: Option<usize>,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// `text` or `json`
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Only process these entities (comma separated)
    #[arg(long, global = true, value_delimiter = ',')]
    pub entities: Vec<String>,
}

impl Overrides {
    /// Layer the flags over `cfg` and re-validate.
    pub fn apply(&self, cfg: &mut PipelineCfg) -> ForecastResult<()> {
        if let Some(v) = &self.data_root {
            cfg.data_root = v.clone();
        }
        if let Some(v) = &self.dataset {
            cfg.dataset = v.clone();
        }
        if let Some(v) = &self.model_dir {
            cfg.model_dir = Some(v.clone());
        }
        if let Some(v) = &self.report_dir {
            cfg.report_dir = v.clone();
        }
        if let Some(v) = self.window {
            cfg.window_len = v;
        }
        if let Some(v) = self.train_fraction {
            cfg.train_fraction = v;
        }
        if let Some(v) = self.min_records {
            cfg.min_records = v;
        }
        if let Some(v) = self.workers {
            cfg.workers = v;
        }
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = &self.log_level {
            cfg.log_level = v.clone();
        }
        if let Some(v) = &self.log_format {
            cfg.log_format = v.parse().map_err(ForecastError::Config)?;
        }
        if !self.entities.is_empty() {
            cfg.entities = Some(self.entities.clone());
        }
        cfg.validate()
    }
}

/// What a command produced.
#[derive(Debug, Default)]
pub struct Outcome {
    pub training: Option<TrainingReport>,
    pub evaluation: Option<EvaluationReport>,
}

impl Outcome {
    /// False only when stages ran and none of them produced a successful entity.
    pub fn succeeded(&self) -> bool {
        let counts: Vec<usize> = self
            .training
            .iter()
            .map(|r| r.successes.len())
            .chain(self.evaluation.iter().map(|r| r.records.len()))
            .collect();
        counts.is_empty() || counts.iter().any(|&n| n > 0)
    }
}

/// Wired components for one invocation.
pub struct Pipeline {
    cfg: Arc<PipelineCfg>,
    source: Box<dyn TableSource>,
    factory: Arc<dyn ModelFactory>,
    registry: Arc<dyn ModelRegistry>,
}

impl Pipeline {
    pub fn new(
        cfg: Arc<PipelineCfg>,
        source: Box<dyn TableSource>,
        factory: Arc<dyn ModelFactory>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        Self {
            cfg,
            source,
            factory,
            registry,
        }
    }

    /// CSV source, linear window models and the filesystem registry.
    pub fn from_cfg(cfg: PipelineCfg) -> ForecastResult<Self> {
        let registry = FsModelRegistry::open(&cfg)?;
        let source = CsvTableSource::new(&cfg);
        let factory = LinearWindowFactory::from_cfg(&cfg);
        Ok(Self::new(
            Arc::new(cfg),
            Box::new(source),
            Arc::new(factory),
            Arc::new(registry),
        ))
    }

    fn load(&self) -> ForecastResult<RawTable> {
        let table = self.source.fetch(&self.cfg.dataset)?;
        let summary = summarize(&table);
        info!(
            entities = summary.entities,
            records = summary.records,
            first = ?summary.first,
            last = ?summary.last,
            "dataset summary"
        );
        Ok(table)
    }

    pub fn train(&self, table: &RawTable) -> ForecastResult<TrainingReport> {
        let trained = TrainingOrchestrator::new(
            self.cfg.clone(),
            self.factory.clone(),
            self.registry.clone(),
        )
        .run(table)?;
        println!("{}", report::render_training(&trained));
        report::write_training_report(&self.cfg.report_dir, &trained)?;
        Ok(trained)
    }

    pub fn evaluate(&self, table: &RawTable) -> ForecastResult<EvaluationReport> {
        let evaluated = EvaluationEngine::new(
            self.cfg.clone(),
            self.factory.clone(),
            self.registry.clone(),
        )
        .run(table)?;
        println!("{}", report::render_evaluation(&evaluated));
        report::write_performance(&self.cfg.report_dir, &evaluated)?;
        report::write_evaluation_failures(&self.cfg.report_dir, &evaluated)?;
        Ok(evaluated)
    }

    pub fn execute(&self, command: Command) -> ForecastResult<Outcome> {
        let table = self.load()?;
        let mut outcome = Outcome::default();
        if matches!(command, Command::Train | Command::Run) {
            outcome.training = Some(self.train(&table)?);
        }
        if matches!(command, Command::Evaluate | Command::Run) {
            outcome.evaluation = Some(self.evaluate(&table)?);
        }
        Ok(outcome)
    }
}

/// Resolve configuration, install logging and run the selected command.
pub fn run(cli: Cli) -> Result<ExitCode> {
    let mut cfg = PipelineCfg::load(cli.overrides.config.as_deref())
        .context("loading configuration")?;
    cli.overrides
        .apply(&mut cfg)
        .context("applying command line flags")?;
    log::init(&cfg)?;
    info!(command = ?cli.command, workers = cfg.workers, window = cfg.window_len, "tickcast starting");

    let pipeline = Pipeline::from_cfg(cfg).context("opening model registry")?;
    let outcome = pipeline.execute(cli.command)?;
    if outcome.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!("no entity succeeded");
        Ok(ExitCode::FAILURE)
    }
}

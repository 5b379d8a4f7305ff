//! Trainable unit contract and the default window regressor.
//!
//! The orchestrator only sees [`Forecaster`] and [`ModelFactory`]; the model
//! internals stay behind them. [`LinearWindowModel`] maps a scaled window to the
//! next scaled value with a linear layer trained on Huber loss with Adam.

use serde::{Deserialize, Serialize};

use crate::common::config::PipelineCfg;
use crate::common::error::{ForecastError, ForecastResult};
use crate::data::domain::EntityId;
use crate::prep::window::WindowedSample;

pub const LINEAR_WINDOW_KIND: &str = "linear_window";

/// Learned parameters, persisted inside the artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub kind: String,
    pub weights: Vec<f64>,
    pub bias: f64,
}

/// Outcome of one `fit` call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub train_loss: f64,
    /// Loss on the held-back tail of the train split that drives early stopping.
    pub validation_loss: f64,
    /// Loss on the monitored split at the best epoch; never used for selection.
    #[serde(default)]
    pub monitor_loss: f64,
}

/// Optimisation knobs taken from the pipeline configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct FitSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub patience: usize,
    pub huber_delta: f64,
    /// Share of the train split held back for early stopping.
    pub validation_fraction: f64,
}

impl FitSettings {
    pub fn from_cfg(cfg: &PipelineCfg) -> Self {
        Self {
            epochs: cfg.epochs,
            batch_size: cfg.batch_size,
            learning_rate: cfg.learning_rate,
            patience: cfg.early_stopping_patience,
            huber_delta: cfg.huber_delta,
            validation_fraction: cfg.validation_fraction,
        }
    }
}

/// A trainable unit with a fit/predict contract, operating in scaled units.
pub trait Forecaster: Send {
    /// Fit on `train`. `monitor` is scored for reporting only and must not
    /// influence the learned parameters.
    fn fit(
        &mut self,
        train: &[WindowedSample],
        monitor: &[WindowedSample],
    ) -> ForecastResult<FitSummary>;

    fn predict(&self, features: &[f64]) -> ForecastResult<f64>;

    fn params(&self) -> ModelParams;

    fn predict_all(&self, samples: &[WindowedSample]) -> ForecastResult<Vec<f64>> {
        samples.iter().map(|s| self.predict(&s.features)).collect()
    }
}

/// Splits `train` into a fitting head and an early-stopping tail.
///
/// The tail holds `floor(len * fraction)` samples; it is empty when that
/// would leave no fitting samples.
pub fn holdout_tail(
    train: &[WindowedSample],
    fraction: f64,
) -> (&[WindowedSample], &[WindowedSample]) {
    let tail = (train.len() as f64 * fraction).floor() as usize;
    if tail == 0 || tail >= train.len() {
        return (train, &[]);
    }
    train.split_at(train.len() - tail)
}

/// Builds fresh units for training and rebuilds them from persisted parameters.
pub trait ModelFactory: Send + Sync {
    fn build(&self, entity: &EntityId, window_len: usize) -> ForecastResult<Box<dyn Forecaster>>;

    fn restore(&self, entity: &EntityId, params: &ModelParams)
        -> ForecastResult<Box<dyn Forecaster>>;
}

/// Factory for [`LinearWindowModel`].
#[derive(Clone, Debug)]
pub struct LinearWindowFactory {
    settings: FitSettings,
}

impl LinearWindowFactory {
    pub fn new(settings: FitSettings) -> Self {
        Self { settings }
    }

    pub fn from_cfg(cfg: &PipelineCfg) -> Self {
        Self::new(FitSettings::from_cfg(cfg))
    }
}

impl ModelFactory for LinearWindowFactory {
    fn build(&self, entity: &EntityId, window_len: usize) -> ForecastResult<Box<dyn Forecaster>> {
        Ok(Box::new(LinearWindowModel::new(
            entity.clone(),
            window_len,
            self.settings.clone(),
        )?))
    }

    fn restore(
        &self,
        entity: &EntityId,
        params: &ModelParams,
    ) -> ForecastResult<Box<dyn Forecaster>> {
        Ok(Box::new(LinearWindowModel::from_params(
            entity.clone(),
            params,
            self.settings.clone(),
        )?))
    }
}

/// Linear regressor over one window.
#[derive(Clone, Debug)]
pub struct LinearWindowModel {
    entity: EntityId,
    weights: Vec<f64>,
    bias: f64,
    settings: FitSettings,
}

impl LinearWindowModel {
    /// Starts as the persistence forecast: the next value equals the last one.
    pub fn new(entity: EntityId, window_len: usize, settings: FitSettings) -> ForecastResult<Self> {
        if window_len == 0 {
            return Err(ForecastError::InvalidInput("window length must be positive".into()));
        }
        let mut weights = vec![0.0; window_len];
        weights[window_len - 1] = 1.0;
        Ok(Self {
            entity,
            weights,
            bias: 0.0,
            settings,
        })
    }

    pub fn from_params(
        entity: EntityId,
        params: &ModelParams,
        settings: FitSettings,
    ) -> ForecastResult<Self> {
        if params.kind != LINEAR_WINDOW_KIND {
            return Err(ForecastError::InvalidInput(format!(
                "artifact holds a `{}` model, expected `{LINEAR_WINDOW_KIND}`",
                params.kind
            )));
        }
        let finite = params.weights.iter().all(|w| w.is_finite()) && params.bias.is_finite();
        if params.weights.is_empty() || !finite {
            return Err(ForecastError::InvalidInput(
                "artifact weights are empty or non-finite".into(),
            ));
        }
        Ok(Self {
            entity,
            weights: params.weights.clone(),
            bias: params.bias,
            settings,
        })
    }

    fn raw_predict(&self, features: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }

    fn mean_loss(&self, samples: &[WindowedSample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let delta = self.settings.huber_delta;
        samples
            .iter()
            .map(|s| huber(self.raw_predict(&s.features) - s.label, delta))
            .sum::<f64>()
            / samples.len() as f64
    }

    /// Mean fitting and early-stopping loss; the latter falls back to the former.
    fn losses(
        &self,
        train: &[WindowedSample],
        validation: &[WindowedSample],
        epoch: usize,
    ) -> ForecastResult<(f64, f64)> {
        let train_loss = self.mean_loss(train);
        let validation_loss = if validation.is_empty() {
            train_loss
        } else {
            self.mean_loss(validation)
        };
        if !train_loss.is_finite() || !validation_loss.is_finite() {
            return Err(ForecastError::training(
                self.entity.as_str(),
                format!("non-finite loss at epoch {epoch}"),
            ));
        }
        Ok((train_loss, validation_loss))
    }

    fn check_shape(&self, samples: &[WindowedSample]) -> ForecastResult<()> {
        match samples.iter().find(|s| s.features.len() != self.weights.len()) {
            Some(s) => Err(ForecastError::InvalidInput(format!(
                "sample has {} features, model expects {}",
                s.features.len(),
                self.weights.len()
            ))),
            None => Ok(()),
        }
    }
}

fn huber(residual: f64, delta: f64) -> f64 {
    let a = residual.abs();
    if a <= delta {
        0.5 * residual * residual
    } else {
        delta * (a - 0.5 * delta)
    }
}

fn huber_grad(residual: f64, delta: f64) -> f64 {
    residual.clamp(-delta, delta)
}

/// First and second moment estimates for one parameter vector.
struct Adam {
    m: Vec<f64>,
    v: Vec<f64>,
    step: i32,
    lr: f64,
}

impl Adam {
    const BETA1: f64 = 0.9;
    const BETA2: f64 = 0.999;
    const EPS: f64 = 1e-8;

    fn new(len: usize, lr: f64) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
            step: 0,
            lr,
        }
    }

    fn apply(&mut self, params: &mut [f64], grads: &[f64]) {
        self.step = self.step.saturating_add(1);
        let c1 = 1.0 - Self::BETA1.powi(self.step);
        let c2 = 1.0 - Self::BETA2.powi(self.step);
        for i in 0..params.len() {
            self.m[i] = Self::BETA1 * self.m[i] + (1.0 - Self::BETA1) * grads[i];
            self.v[i] = Self::BETA2 * self.v[i] + (1.0 - Self::BETA2) * grads[i] * grads[i];
            let m_hat = self.m[i] / c1;
            let v_hat = self.v[i] / c2;
            params[i] -= self.lr * m_hat / (v_hat.sqrt() + Self::EPS);
        }
    }
}

impl Forecaster for LinearWindowModel {
    fn fit(
        &mut self,
        train: &[WindowedSample],
        monitor: &[WindowedSample],
    ) -> ForecastResult<FitSummary> {
        if train.is_empty() {
            return Err(ForecastError::training(self.entity.as_str(), "empty train split"));
        }
        self.check_shape(train)?;
        self.check_shape(monitor)?;
        let (train, validation) = holdout_tail(train, self.settings.validation_fraction);

        let n = self.weights.len();
        let delta = self.settings.huber_delta;
        // Weights followed by the bias, updated as one vector.
        let mut params: Vec<f64> = self.weights.iter().copied().chain([self.bias]).collect();
        let mut adam = Adam::new(n + 1, self.settings.learning_rate);

        let (train_loss, validation_loss) = self.losses(train, validation, 0)?;
        let mut best = params.clone();
        let mut best_loss = validation_loss;
        let mut summary = FitSummary {
            train_loss,
            validation_loss,
            ..FitSummary::default()
        };
        let mut stale = 0usize;

        for epoch in 1..=self.settings.epochs {
            for batch in train.chunks(self.settings.batch_size) {
                let mut grads = vec![0.0; n + 1];
                for s in batch {
                    let pred = params[..n]
                        .iter()
                        .zip(&s.features)
                        .map(|(w, x)| w * x)
                        .sum::<f64>()
                        + params[n];
                    let g = huber_grad(pred - s.label, delta);
                    for (acc, x) in grads[..n].iter_mut().zip(&s.features) {
                        *acc += g * x;
                    }
                    grads[n] += g;
                }
                let scale = batch.len() as f64;
                grads.iter_mut().for_each(|g| *g /= scale);
                adam.apply(&mut params, &grads);
            }

            self.weights.copy_from_slice(&params[..n]);
            self.bias = params[n];
            let (train_loss, validation_loss) = self.losses(train, validation, epoch)?;

            summary.epochs_run = epoch;
            if validation_loss < best_loss {
                best_loss = validation_loss;
                best.copy_from_slice(&params);
                summary.best_epoch = epoch;
                summary.train_loss = train_loss;
                summary.validation_loss = validation_loss;
                stale = 0;
            } else {
                stale += 1;
                if self.settings.patience > 0 && stale >= self.settings.patience {
                    break;
                }
            }
        }

        self.weights.copy_from_slice(&best[..n]);
        self.bias = best[n];
        summary.monitor_loss = self.mean_loss(monitor);
        Ok(summary)
    }

    fn predict(&self, features: &[f64]) -> ForecastResult<f64> {
        if features.len() != self.weights.len() {
            return Err(ForecastError::InvalidInput(format!(
                "window has {} values, model expects {}",
                features.len(),
                self.weights.len()
            )));
        }
        let y = self.raw_predict(features);
        if !y.is_finite() {
            return Err(ForecastError::training(
                self.entity.as_str(),
                "non-finite prediction",
            ));
        }
        Ok(y)
    }

    fn params(&self) -> ModelParams {
        ModelParams {
            kind: LINEAR_WINDOW_KIND.to_string(),
            weights: self.weights.clone(),
            bias: self.bias,
        }
    }
}

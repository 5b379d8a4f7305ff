//! The per-entity training task.
//!
//! One call covers the whole lifecycle of one entity: window, split, fit the
//! scaler, fit the model, score the held-out suffix in original units and
//! persist the artifact. Nothing here touches another entity's state.

use chrono::Utc;
use tracing::{debug, info, info_span};

use crate::common::config::PipelineCfg;
use crate::common::error::{ForecastError, ForecastResult};
use crate::common::time;
use crate::data::domain::EntityGroup;
use crate::inference::service::predict_original_units;
use crate::prep::{scaling, window};

use super::domain::{ModelArtifact, ModelRegistry, TrainMetrics, ARTIFACT_FORMAT_VERSION};
use super::model::ModelFactory;

/// Pairs kept for the training log and report.
pub const PREVIEW_LEN: usize = 5;

/// Mean squared error; `None` for empty or mismatched input.
pub fn mean_squared_error(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return None;
    }
    let sum: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a) * (p - a))
        .sum();
    Some(sum / predicted.len() as f64)
}

/// Train, score and persist one entity.
pub fn train_entity(
    group: &EntityGroup,
    cfg: &PipelineCfg,
    factory: &dyn ModelFactory,
    registry: &dyn ModelRegistry,
) -> ForecastResult<TrainMetrics> {
    let entity = &group.entity_id;
    let span = info_span!("train", entity = %entity);
    let _guard = span.enter();
    let start = time::now_ms();

    let samples = window::build_windows(group, cfg.window_len)?;
    let (scaled, scaler) =
        scaling::prepare(entity, samples, cfg.train_fraction, cfg.scale_range())?;
    debug!(
        train = scaled.train.len(),
        test = scaled.test.len(),
        data_min = scaler.data_min(),
        data_max = scaler.data_max(),
        "samples prepared"
    );

    let mut model = factory.build(entity, cfg.window_len)?;
    let fit = model
        .fit(&scaled.train, &scaled.test)
        .map_err(|e| as_training_failure(entity.as_str(), e))?;

    let predicted = predict_original_units(model.as_ref(), &scaler, &scaled.test)
        .map_err(|e| as_training_failure(entity.as_str(), e))?;
    let actual: Vec<f64> = scaled.test.iter().map(|s| scaler.inverse(s.label)).collect();
    let test_mse = mean_squared_error(&predicted, &actual)
        .filter(|m| m.is_finite())
        .ok_or_else(|| ForecastError::training(entity.as_str(), "test error is not finite"))?;

    let artifact = ModelArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        entity_id: entity.clone(),
        window_len: cfg.window_len,
        train_fraction: cfg.train_fraction,
        scaler,
        model: model.params(),
        fit: fit.clone(),
        train_samples: scaled.train.len(),
        test_samples: scaled.test.len(),
        test_mse,
        series_digest: group.digest(),
        trained_at: Utc::now(),
    };
    registry.put(&artifact)?;

    let preview: Vec<(f64, f64)> = predicted
        .iter()
        .copied()
        .zip(actual.iter().copied())
        .take(PREVIEW_LEN)
        .collect();
    for (i, (p, a)) in preview.iter().enumerate() {
        debug!(i, predicted = p, actual = a, "test preview");
    }
    info!(
        samples = artifact.train_samples + artifact.test_samples,
        mse = test_mse,
        epochs = fit.epochs_run,
        best_epoch = fit.best_epoch,
        monitor_loss = fit.monitor_loss,
        dur_ms = time::elapsed_ms(start) as u64,
        "entity trained"
    );

    Ok(TrainMetrics {
        entity_id: entity.clone(),
        train_samples: artifact.train_samples,
        test_samples: artifact.test_samples,
        test_mse,
        epochs_run: fit.epochs_run,
        best_epoch: fit.best_epoch,
        storage_key: registry.key_for(entity),
        preview,
    })
}

// Anything the model raises during fit/predict counts against this entity.
fn as_training_failure(entity: &str, err: ForecastError) -> ForecastError {
    match err {
        ForecastError::TrainingFailure { .. } => err,
        other => ForecastError::training(entity, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::data::service::tests::daily;
    use crate::data::{partition, RawTable};
    use crate::training::model::LinearWindowFactory;
    use crate::training::repo_mem::MemoryModelRegistry;

    fn cfg() -> PipelineCfg {
        PipelineCfg {
            window_len: 10,
            min_records: 20,
            epochs: 5,
            batch_size: 8,
            ..PipelineCfg::default()
        }
    }

    fn group(entity: &str, n: usize) -> EntityGroup {
        let values: Vec<f64> = (0..n).map(|i| 100.0 + (i as f64 * 0.2).sin() * 5.0).collect();
        let table = RawTable::new(daily(entity, &values));
        partition(&table, 1).eligible.remove(&entity.into()).unwrap()
    }

    #[test]
    fn mse_matches_hand_computation() {
        assert_relative_eq!(
            mean_squared_error(&[1.0, 2.0, 4.0], &[1.0, 3.0, 2.0]).unwrap(),
            5.0 / 3.0
        );
        assert_eq!(mean_squared_error(&[], &[]), None);
        assert_eq!(mean_squared_error(&[1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn trains_and_persists_one_entity() {
        let cfg = cfg();
        let registry = MemoryModelRegistry::new(&cfg.artifact_prefix);
        let factory = LinearWindowFactory::from_cfg(&cfg);
        let g = group("AAPL", 60);

        let metrics = train_entity(&g, &cfg, &factory, &registry).unwrap();
        // 50 samples, floor(0.8 * 50) = 40 train.
        assert_eq!((metrics.train_samples, metrics.test_samples), (40, 10));
        assert_eq!(metrics.preview.len(), PREVIEW_LEN);
        assert_eq!(metrics.storage_key, "lstm_AAPL");

        let stored = registry.get(&"AAPL".into()).unwrap();
        assert_eq!(stored.test_mse, metrics.test_mse);
        assert_eq!(stored.window_len, 10);
        assert_eq!(stored.series_digest, g.digest());
        assert!(stored.scaler.data_max() <= 105.0 + 1e-9);
    }

    #[test]
    fn a_series_without_a_test_side_is_insufficient() {
        let cfg = cfg();
        let registry = MemoryModelRegistry::new("lstm");
        let factory = LinearWindowFactory::from_cfg(&cfg);
        let err = train_entity(&group("X", 11), &cfg, &factory, &registry).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { .. }));
        assert!(registry.is_empty());
    }
}

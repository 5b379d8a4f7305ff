//! Model application in original units.
//!
//! Inputs are always scaled with the scaler the model was trained with and
//! outputs are always inverted with that same scaler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::common::error::{ForecastError, ForecastResult};
use crate::common::time;
use crate::data::domain::EntityGroup;
use crate::prep::scaling::ScalerState;
use crate::prep::window::{self, WindowedSample};
use crate::training::model::Forecaster;

/// One-step-ahead forecast for an entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Forecast {
    pub next_timestamp: DateTime<Utc>,
    pub value: f64,
    /// Last observed value the forecast continues from.
    pub last_value: f64,
}

/// Predict every (already scaled) sample and invert the result.
pub fn predict_original_units(
    model: &dyn Forecaster,
    scaler: &ScalerState,
    scaled: &[WindowedSample],
) -> ForecastResult<Vec<f64>> {
    Ok(model
        .predict_all(scaled)?
        .into_iter()
        .map(|y| scaler.inverse(y))
        .collect())
}

/// Forecast the value `horizon_days` after the last observation.
pub fn forecast_next(
    model: &dyn Forecaster,
    scaler: &ScalerState,
    group: &EntityGroup,
    window_len: usize,
    horizon_days: i64,
) -> ForecastResult<Forecast> {
    let last = group.last().ok_or_else(|| ForecastError::InsufficientData {
        entity: group.entity_id.to_string(),
        records: 0,
        required: window_len,
    })?;
    let recent = window::latest_window(group, window_len)?;
    let scaled = scaler.transform_all(&recent);
    let value = scaler.inverse(model.predict(&scaled)?);
    if !value.is_finite() {
        return Err(ForecastError::training(
            group.entity_id.as_str(),
            "forecast is not finite",
        ));
    }
    let next_timestamp = time::advance_days(last.timestamp, horizon_days);
    debug!(entity = %group.entity_id, next = %next_timestamp, value, "forecast produced");
    Ok(Forecast {
        next_timestamp,
        value,
        last_value: last.value,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::data::service::tests::{daily, day};
    use crate::data::{partition, RawTable};
    use crate::training::model::{FitSettings, LinearWindowModel};

    fn persistence(window_len: usize) -> LinearWindowModel {
        let settings = FitSettings {
            epochs: 1,
            batch_size: 1,
            learning_rate: 0.01,
            patience: 0,
            huber_delta: 1.0,
            validation_fraction: 0.0,
        };
        LinearWindowModel::new("A".into(), window_len, settings).unwrap()
    }

    fn group(values: &[f64]) -> EntityGroup {
        partition(&RawTable::new(daily("A", values)), 1)
            .eligible
            .remove(&"A".into())
            .unwrap()
    }

    #[test]
    fn forecast_continues_from_the_last_observation() {
        let g = group(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        // Fitted on a smaller range than the recent data.
        let scaler = ScalerState::fit([10.0, 12.0], (0.0, 1.0)).unwrap();
        let f = forecast_next(&persistence(3), &scaler, &g, 3, 1).unwrap();
        assert_abs_diff_eq!(f.value, 14.0, epsilon = 1e-9);
        assert_eq!(f.last_value, 14.0);
        assert_eq!(f.next_timestamp, day(5));
    }

    #[test]
    fn horizon_moves_the_target_date() {
        let g = group(&[1.0, 2.0, 3.0]);
        let scaler = ScalerState::fit([1.0, 3.0], (0.0, 1.0)).unwrap();
        let f = forecast_next(&persistence(2), &scaler, &g, 2, 3).unwrap();
        assert_eq!(f.next_timestamp, day(5));
    }

    #[test]
    fn short_series_cannot_be_forecast() {
        let g = group(&[1.0, 2.0]);
        let scaler = ScalerState::fit([1.0, 2.0], (0.0, 1.0)).unwrap();
        let err = forecast_next(&persistence(3), &scaler, &g, 3, 1).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { .. }));
    }

    #[test]
    fn batch_predictions_are_inverted() {
        let g = group(&[2.0, 4.0, 6.0, 8.0]);
        let scaler = ScalerState::fit([2.0, 8.0], (0.0, 1.0)).unwrap();
        let samples = window::build_windows(&g, 2).unwrap();
        let scaled: Vec<_> = samples.iter().map(|s| scaler.transform_sample(s)).collect();
        let out = predict_original_units(&persistence(2), &scaler, &scaled).unwrap();
        assert_eq!(out.len(), 2);
        assert_abs_diff_eq!(out[0], 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[1], 6.0, epsilon = 1e-9);
    }
}

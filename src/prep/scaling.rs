//! Min-max scaling fitted on the train prefix only.
//!
//! A [`ScalerState`] can only be obtained by fitting, so applying a scaler
//! that was never fitted is unrepresentable. Test samples and forecast inputs
//! go through [`ScalerState::transform`] with the train-fitted state.

use serde::{Deserialize, Serialize};

use crate::common::error::{ForecastError, ForecastResult};
use crate::data::domain::EntityId;

use super::window::WindowedSample;

/// Fitted min-max parameters mapping `[data_min, data_max]` onto `[range_min, range_max]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    data_min: f64,
    data_max: f64,
    range_min: f64,
    range_max: f64,
    /// Number of values the state was fitted on.
    fitted_on: usize,
}

impl ScalerState {
    /// Fit on `values`. Empty input or non-finite values are rejected.
    pub fn fit<I>(values: I, range: (f64, f64)) -> ForecastResult<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut data_min = f64::INFINITY;
        let mut data_max = f64::NEG_INFINITY;
        let mut fitted_on = 0usize;
        for v in values {
            if !v.is_finite() {
                return Err(ForecastError::InvalidInput(format!(
                    "cannot fit scaler on non-finite value {v}"
                )));
            }
            data_min = data_min.min(v);
            data_max = data_max.max(v);
            fitted_on += 1;
        }
        if fitted_on == 0 {
            return Err(ForecastError::InvalidInput("cannot fit scaler on no values".into()));
        }
        let state = Self {
            data_min,
            data_max,
            range_min: range.0,
            range_max: range.1,
            fitted_on,
        };
        state.validate()?;
        Ok(state)
    }

    pub fn data_min(&self) -> f64 {
        self.data_min
    }

    pub fn data_max(&self) -> f64 {
        self.data_max
    }

    pub fn range(&self) -> (f64, f64) {
        (self.range_min, self.range_max)
    }

    pub fn fitted_on(&self) -> usize {
        self.fitted_on
    }

    /// Check a state that did not come from [`ScalerState::fit`] (e.g. a loaded artifact).
    pub fn validate(&self) -> ForecastResult<()> {
        let finite = [self.data_min, self.data_max, self.range_min, self.range_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(ForecastError::ScalingInvariant("non-finite scaler bounds"));
        }
        if self.data_min > self.data_max {
            return Err(ForecastError::ScalingInvariant("data_min exceeds data_max"));
        }
        if self.range_min >= self.range_max {
            return Err(ForecastError::ScalingInvariant("empty target range"));
        }
        if self.fitted_on == 0 {
            return Err(ForecastError::ScalingInvariant("scaler fitted on no values"));
        }
        Ok(())
    }

    // A constant series maps onto range_min.
    fn scale(&self) -> f64 {
        let span = self.data_max - self.data_min;
        let span = if span == 0.0 { 1.0 } else { span };
        (self.range_max - self.range_min) / span
    }

    pub fn transform(&self, x: f64) -> f64 {
        self.range_min + (x - self.data_min) * self.scale()
    }

    pub fn inverse(&self, y: f64) -> f64 {
        self.data_min + (y - self.range_min) / self.scale()
    }

    pub fn transform_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.transform(*v)).collect()
    }

    pub fn transform_sample(&self, sample: &WindowedSample) -> WindowedSample {
        WindowedSample {
            features: self.transform_all(&sample.features),
            label: self.transform(sample.label),
            label_at: sample.label_at,
        }
    }
}

/// An entity's samples split in time order, train strictly before test.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplitSampleSet {
    pub train: Vec<WindowedSample>,
    pub test: Vec<WindowedSample>,
}

impl SplitSampleSet {
    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.test.is_empty()
    }
}

/// `floor(fraction * count)`, clamped to `count`.
pub fn split_index(count: usize, fraction: f64) -> usize {
    ((count as f64 * fraction).floor() as usize).min(count)
}

/// Split without shuffling; both sides must be non-empty.
pub fn split(
    entity: &EntityId,
    mut samples: Vec<WindowedSample>,
    fraction: f64,
) -> ForecastResult<SplitSampleSet> {
    let at = split_index(samples.len(), fraction);
    if at == 0 || at == samples.len() {
        return Err(ForecastError::InsufficientData {
            entity: entity.to_string(),
            records: samples.len(),
            required: minimum_samples(fraction),
        });
    }
    let test = samples.split_off(at);
    Ok(SplitSampleSet {
        train: samples,
        test,
    })
}

// Smallest sample count leaving at least one sample on each side.
fn minimum_samples(fraction: f64) -> usize {
    (2..=10_000)
        .find(|&n| {
            let at = split_index(n, fraction);
            at > 0 && at < n
        })
        .unwrap_or(2)
}

/// Fit on every feature and label of the train prefix.
pub fn fit_on_train(train: &[WindowedSample], range: (f64, f64)) -> ForecastResult<ScalerState> {
    ScalerState::fit(
        train
            .iter()
            .flat_map(|s| s.features.iter().copied().chain(std::iter::once(s.label))),
        range,
    )
}

/// Apply an already fitted state to both sides of a split.
pub fn apply(scaler: &ScalerState, set: &SplitSampleSet) -> SplitSampleSet {
    SplitSampleSet {
        train: set.train.iter().map(|s| scaler.transform_sample(s)).collect(),
        test: set.test.iter().map(|s| scaler.transform_sample(s)).collect(),
    }
}

/// Split, fit on the train prefix, then scale both sides with that one state.
pub fn prepare(
    entity: &EntityId,
    samples: Vec<WindowedSample>,
    fraction: f64,
    range: (f64, f64),
) -> ForecastResult<(SplitSampleSet, ScalerState)> {
    let raw = split(entity, samples, fraction)?;
    let scaler = fit_on_train(&raw.train, range)?;
    Ok((apply(&scaler, &raw), scaler))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::data::service::tests::day;
    use crate::prep::window::windows_from;

    fn samples(values: &[f64], window_len: usize) -> Vec<WindowedSample> {
        let stamps: Vec<_> = (0..values.len()).map(|i| day(i as i64)).collect();
        windows_from(values, &stamps, window_len)
    }

    #[test]
    fn split_is_floor_of_fraction_and_order_preserving() {
        let all = samples(&(0..130).map(f64::from).collect::<Vec<_>>(), 60);
        let set = split(&"A".into(), all, 0.8).unwrap();
        assert_eq!((set.train.len(), set.test.len()), (56, 14));
        let last_train = set.train.last().unwrap().label_at;
        let first_test = set.test.first().unwrap().label_at;
        assert!(last_train < first_test);
    }

    #[test]
    fn split_needs_a_sample_on_each_side() {
        let err = split(&"A".into(), samples(&[1.0, 2.0, 3.0], 2), 0.8).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { required: 2, .. }));
    }

    #[test]
    fn scaler_ignores_the_test_suffix() {
        // Test period breaks out far above anything seen in training.
        let mut values: Vec<f64> = (0..45).map(|i| 10.0 + f64::from(i % 5)).collect();
        values.extend((0..10).map(|i| 1_000.0 + f64::from(i)));
        let all = samples(&values, 5);

        let raw = split(&"A".into(), all.clone(), 0.8).unwrap();
        let (scaled, scaler) = prepare(&"A".into(), all, 0.8, (0.0, 1.0)).unwrap();

        assert_eq!(scaler, fit_on_train(&raw.train, (0.0, 1.0)).unwrap());
        assert_eq!((scaler.data_min(), scaler.data_max()), (10.0, 14.0));
        let everything = fit_on_train(&[raw.train.clone(), raw.test.clone()].concat(), (0.0, 1.0))
            .unwrap();
        assert_ne!(everything.data_max(), scaler.data_max());

        assert!(scaled.train.iter().all(|s| (0.0..=1.0).contains(&s.label)));
        assert!(scaled.test.iter().any(|s| s.label > 1.0));
    }

    #[test]
    fn refitting_the_same_data_is_bit_identical() {
        let all = samples(&(0..130).map(|i| (f64::from(i) * 0.37).sin() * 50.0 + 100.0).collect::<Vec<_>>(), 60);
        let (_, a) = prepare(&"A".into(), all.clone(), 0.8, (0.0, 1.0)).unwrap();
        let (_, b) = prepare(&"A".into(), all, 0.8, (0.0, 1.0)).unwrap();
        assert_eq!(a.data_min().to_bits(), b.data_min().to_bits());
        assert_eq!(a.data_max().to_bits(), b.data_max().to_bits());
    }

    #[test]
    fn constant_series_is_still_invertible() {
        let s = ScalerState::fit([5.0, 5.0, 5.0], (0.0, 1.0)).unwrap();
        assert_eq!(s.transform(5.0), 0.0);
        assert_abs_diff_eq!(s.inverse(s.transform(7.5)), 7.5, epsilon = 1e-12);
    }

    #[test]
    fn fit_rejects_empty_and_non_finite_input() {
        assert!(ScalerState::fit(std::iter::empty(), (0.0, 1.0)).is_err());
        assert!(ScalerState::fit([1.0, f64::NAN], (0.0, 1.0)).is_err());
    }

    #[test]
    fn corrupted_state_fails_validation() {
        let bad: ScalerState = serde_json::from_str(
            r#"{"data_min":2.0,"data_max":1.0,"range_min":0.0,"range_max":1.0,"fitted_on":3}"#,
        )
        .unwrap();
        assert!(matches!(bad.validate(), Err(ForecastError::ScalingInvariant(_))));
    }

    proptest! {
        #[test]
        fn prop_inverse_undoes_transform(
            fit in prop::collection::vec(-1e4f64..1e4, 1..50),
            value in -1e4f64..1e4,
            lo in -5.0f64..0.0,
            width in 0.5f64..5.0,
        ) {
            let s = ScalerState::fit(fit, (lo, lo + width)).unwrap();
            let back = s.inverse(s.transform(value));
            prop_assert!((back - value).abs() <= 1e-9 * value.abs().max(1.0));
        }

        #[test]
        fn prop_fitted_domain_maps_into_range(
            fit in prop::collection::vec(-1e4f64..1e4, 2..50),
        ) {
            let s = ScalerState::fit(fit.clone(), (0.0, 1.0)).unwrap();
            for v in fit {
                let y = s.transform(v);
                prop_assert!((-1e-12..=1.0 + 1e-12).contains(&y));
            }
        }
    }
}

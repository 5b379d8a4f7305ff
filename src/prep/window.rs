//! Sliding-window sample construction for a single entity.

use chrono::{DateTime, Utc};

use crate::common::error::{ForecastError, ForecastResult};
use crate::data::domain::EntityGroup;

/// `window_len` consecutive past values and the value that follows them.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowedSample {
    pub features: Vec<f64>,
    pub label: f64,
    /// Timestamp of the label observation.
    pub label_at: DateTime<Utc>,
}

/// Number of samples a series of `len` values yields.
pub fn window_count(len: usize, window_len: usize) -> usize {
    len.saturating_sub(window_len)
}

/// Samples in chronological order: features `values[i-W..i]`, label `values[i]`.
///
/// Returns an empty vector when the series is not longer than the window.
pub fn windows_from(
    values: &[f64],
    timestamps: &[DateTime<Utc>],
    window_len: usize,
) -> Vec<WindowedSample> {
    debug_assert_eq!(values.len(), timestamps.len());
    if window_len == 0 {
        return Vec::new();
    }
    (window_len..values.len())
        .map(|i| WindowedSample {
            features: values[i - window_len..i].to_vec(),
            label: values[i],
            label_at: timestamps[i],
        })
        .collect()
}

/// Window one entity's series; a series with no full window is `InsufficientData`.
pub fn build_windows(group: &EntityGroup, window_len: usize) -> ForecastResult<Vec<WindowedSample>> {
    let samples = windows_from(&group.values(), &group.timestamps(), window_len);
    if samples.is_empty() {
        return Err(ForecastError::InsufficientData {
            entity: group.entity_id.to_string(),
            records: group.len(),
            required: window_len.saturating_add(1),
        });
    }
    Ok(samples)
}

/// The most recent `window_len` values, oldest first, used for a forecast.
pub fn latest_window(group: &EntityGroup, window_len: usize) -> ForecastResult<Vec<f64>> {
    if window_len == 0 || group.len() < window_len {
        return Err(ForecastError::InsufficientData {
            entity: group.entity_id.to_string(),
            records: group.len(),
            required: window_len,
        });
    }
    Ok(group.records[group.len() - window_len..]
        .iter()
        .map(|r| r.value)
        .collect())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::data::service::tests::{daily, day};

    fn group(values: &[f64]) -> EntityGroup {
        EntityGroup {
            entity_id: "A".into(),
            records: daily("A", values),
            duplicates_dropped: 0,
        }
    }

    #[test]
    fn features_precede_their_label() {
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        let samples = build_windows(&group(&values), 3).unwrap();
        assert_eq!(samples.len(), 7);
        assert_eq!(samples[0].features, vec![0.0, 1.0, 2.0]);
        assert_eq!(samples[0].label, 3.0);
        assert_eq!(samples[0].label_at, day(3));
        assert_eq!(samples[6].features, vec![6.0, 7.0, 8.0]);
        assert_eq!(samples[6].label, 9.0);
    }

    #[test]
    fn entity_of_130_records_yields_70_samples() {
        let samples = build_windows(&group(&[1.0; 130]), 60).unwrap();
        assert_eq!(samples.len(), 70);
    }

    #[test]
    fn short_series_is_insufficient_not_a_panic() {
        let err = build_windows(&group(&[1.0; 60]), 60).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData { records: 60, required: 61, .. }
        ));
        assert!(build_windows(&group(&[]), 60).is_err());
    }

    #[test]
    fn huge_window_is_insufficient_without_overflow() {
        let err = build_windows(&group(&[1.0; 10]), usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData { required: usize::MAX, .. }
        ));
        assert!(latest_window(&group(&[1.0; 10]), usize::MAX).is_err());
    }

    #[test]
    fn latest_window_takes_the_tail() {
        let w = latest_window(&group(&[1.0, 2.0, 3.0, 4.0]), 2).unwrap();
        assert_eq!(w, vec![3.0, 4.0]);
        assert!(latest_window(&group(&[1.0]), 2).is_err());
    }

    proptest! {
        #[test]
        fn prop_window_count_and_contents(
            values in prop::collection::vec(-1e6f64..1e6, 0..80),
            window_len in 1usize..20,
        ) {
            let stamps: Vec<_> = (0..values.len()).map(|i| day(i as i64)).collect();
            let samples = windows_from(&values, &stamps, window_len);
            prop_assert_eq!(samples.len(), values.len().saturating_sub(window_len));
            prop_assert_eq!(samples.len(), window_count(values.len(), window_len));
            for (k, s) in samples.iter().enumerate() {
                let i = k + window_len;
                prop_assert_eq!(&s.features[..], &values[i - window_len..i]);
                prop_assert_eq!(s.label, values[i]);
                prop_assert_eq!(s.label_at, stamps[i]);
            }
        }
    }
}

//! Evaluation rows and the ranked report.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data::domain::EntityId;
use crate::training::domain::TaskFailure;

/// Derived score `1 / (1 + error)`, in `(0, 1]` for non-negative errors.
pub fn accuracy(error: f64) -> f64 {
    1.0 / (1.0 + error)
}

/// Sign of the forecast relative to the last observation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn between(last: f64, next: f64) -> Self {
        if next > last {
            Direction::Up
        } else if next < last {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

/// Result of evaluating one entity's artifact against current data.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub entity_id: EntityId,
    /// MSE on the train split, original units.
    pub train_error: f64,
    /// MSE on the test split, original units.
    pub test_error: f64,
    pub next_timestamp: DateTime<Utc>,
    pub next_value_prediction: f64,
    pub last_value: f64,
    pub accuracy: f64,
}

impl EvaluationRecord {
    pub fn direction(&self) -> Direction {
        Direction::between(self.last_value, self.next_value_prediction)
    }
}

/// Ranked evaluation results plus the entities that could not be evaluated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationReport {
    /// Ascending by test error.
    pub records: Vec<EvaluationRecord>,
    pub failures: Vec<TaskFailure>,
}

impl EvaluationReport {
    pub fn attempted(&self) -> usize {
        self.records.len() + self.failures.len()
    }

    pub fn record(&self, entity: &str) -> Option<&EvaluationRecord> {
        self.records.iter().find(|r| r.entity_id.as_str() == entity)
    }

    pub fn failure(&self, entity: &str) -> Option<&TaskFailure> {
        self.failures.iter().find(|f| f.entity_id.as_str() == entity)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn accuracy_of_a_perfect_model_is_one() {
        assert_eq!(accuracy(0.0), 1.0);
        assert_eq!(accuracy(1.0), 0.5);
    }

    #[test]
    fn direction_compares_against_the_last_value() {
        assert_eq!(Direction::between(10.0, 10.5), Direction::Up);
        assert_eq!(Direction::between(10.0, 9.0).as_str(), "down");
        assert_eq!(Direction::between(3.0, 3.0), Direction::Flat);
    }

    proptest! {
        #[test]
        fn prop_accuracy_is_bounded_and_decreasing(a in 0.0f64..1e6, b in 0.0f64..1e6) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(accuracy(lo) > 0.0 && accuracy(lo) <= 1.0);
            prop_assert!(accuracy(lo) >= accuracy(hi));
        }
    }
}

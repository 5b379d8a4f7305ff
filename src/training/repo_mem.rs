//! In-process registry, used for dry runs and tests.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

use crate::common::error::{ForecastError, ForecastResult};
use crate::data::domain::EntityId;

use super::domain::{artifact_key, ModelArtifact, ModelRegistry};

#[derive(Default)]
pub struct MemoryModelRegistry {
    prefix: String,
    artifacts: RwLock<BTreeMap<EntityId, ModelArtifact>>,
}

impl MemoryModelRegistry {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            artifacts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }
}

impl ModelRegistry for MemoryModelRegistry {
    fn ensure_ready(&self) -> ForecastResult<()> {
        Ok(())
    }

    fn put(&self, artifact: &ModelArtifact) -> ForecastResult<()> {
        self.artifacts
            .write()
            .insert(artifact.entity_id.clone(), artifact.clone());
        Ok(())
    }

    fn get(&self, entity: &EntityId) -> ForecastResult<ModelArtifact> {
        self.artifacts
            .read()
            .get(entity)
            .cloned()
            .ok_or_else(|| ForecastError::ArtifactNotFound(entity.to_string()))
    }

    fn list(&self) -> ForecastResult<BTreeSet<EntityId>> {
        Ok(self.artifacts.read().keys().cloned().collect())
    }

    fn key_for(&self, entity: &EntityId) -> String {
        artifact_key(&self.prefix, entity)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::prep::scaling::ScalerState;
    use crate::training::domain::ARTIFACT_FORMAT_VERSION;
    use crate::training::model::{FitSummary, ModelParams, LINEAR_WINDOW_KIND};

    pub(crate) fn artifact(entity: &str, test_mse: f64) -> ModelArtifact {
        ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            entity_id: entity.into(),
            window_len: 2,
            train_fraction: 0.8,
            scaler: ScalerState::fit([1.0, 3.0], (0.0, 1.0)).unwrap(),
            model: ModelParams {
                kind: LINEAR_WINDOW_KIND.into(),
                weights: vec![0.0, 1.0],
                bias: 0.0,
            },
            fit: FitSummary::default(),
            train_samples: 8,
            test_samples: 2,
            test_mse,
            series_digest: "0".into(),
            trained_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn behaves_like_a_registry() {
        let reg = MemoryModelRegistry::new("lstm");
        assert!(reg.is_empty());
        reg.put(&artifact("A", 1.0)).unwrap();
        reg.put(&artifact("A", 2.0)).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&"A".into()).unwrap().test_mse, 2.0);
        assert!(matches!(
            reg.get(&"B".into()),
            Err(ForecastError::ArtifactNotFound(_))
        ));
        assert_eq!(reg.key_for(&"A".into()), "lstm_A");
    }
}

//! Filesystem registry: one JSON artifact per entity plus a manifest.
//!
//! The manifest (`registry.json`) maps entity ids to artifact files, so
//! discovery is a registry query rather than a directory scan. Artifact and
//! manifest writes go through a temp file and a rename.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::config::PipelineCfg;
use crate::common::error::{ForecastError, ForecastResult};
use crate::data::domain::EntityId;

use super::domain::{artifact_key, ModelArtifact, ModelRegistry};

const MANIFEST_FILE: &str = "registry.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    /// Entity id to artifact file name.
    artifacts: BTreeMap<EntityId, String>,
}

/// Persist artifacts under `cfg.model_dir()`.
pub struct FsModelRegistry {
    root: PathBuf,
    prefix: String,
    manifest: Mutex<Manifest>,
}

impl FsModelRegistry {
    /// Open (creating if needed) the registry directory and load its manifest.
    pub fn open(cfg: &PipelineCfg) -> ForecastResult<Self> {
        Self::open_at(cfg.model_dir(), &cfg.artifact_prefix)
    }

    pub fn open_at(root: impl Into<PathBuf>, prefix: &str) -> ForecastResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            ForecastError::Registry(format!("cannot create {}: {e}", root.display()))
        })?;
        let manifest = Self::load_manifest(&root)?;
        info!(root = %root.display(), artifacts = manifest.artifacts.len(), "model registry opened");
        Ok(Self {
            root,
            prefix: prefix.to_string(),
            manifest: Mutex::new(manifest),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_manifest(root: &Path) -> ForecastResult<Manifest> {
        let path = root.join(MANIFEST_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                ForecastError::Registry(format!("corrupt manifest {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(ForecastError::Registry(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    fn artifact_file(&self, entity: &EntityId) -> String {
        format!("{}.json", self.key_for(entity))
    }
}

/// Write `bytes` next to `path` and rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> ForecastResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|e| ForecastError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| ForecastError::io(path, e))
}

impl ModelRegistry for FsModelRegistry {
    fn ensure_ready(&self) -> ForecastResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(ForecastError::Registry(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }

    fn put(&self, artifact: &ModelArtifact) -> ForecastResult<()> {
        let file = self.artifact_file(&artifact.entity_id);
        let path = self.root.join(&file);
        let body = serde_json::to_vec_pretty(artifact)?;
        write_atomic(&path, &body)?;

        // Only the manifest is shared between entities.
        let mut manifest = self.manifest.lock();
        manifest
            .artifacts
            .insert(artifact.entity_id.clone(), file);
        let raw = serde_json::to_vec_pretty(&*manifest)?;
        write_atomic(&self.root.join(MANIFEST_FILE), &raw)?;

        debug!(entity = %artifact.entity_id, path = %path.display(), bytes = body.len(), "artifact stored");
        Ok(())
    }

    fn get(&self, entity: &EntityId) -> ForecastResult<ModelArtifact> {
        let file = self
            .manifest
            .lock()
            .artifacts
            .get(entity)
            .cloned()
            .ok_or_else(|| ForecastError::ArtifactNotFound(entity.to_string()))?;
        let path = self.root.join(file);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ForecastError::ArtifactNotFound(entity.to_string()))
            }
            Err(e) => return Err(ForecastError::io(&path, e)),
        };
        let artifact: ModelArtifact = serde_json::from_slice(&raw)?;
        artifact.validate(entity)?;
        Ok(artifact)
    }

    fn list(&self) -> ForecastResult<BTreeSet<EntityId>> {
        Ok(self.manifest.lock().artifacts.keys().cloned().collect())
    }

    fn key_for(&self, entity: &EntityId) -> String {
        artifact_key(&self.prefix, entity)
    }
}

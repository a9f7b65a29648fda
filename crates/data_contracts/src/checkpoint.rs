//! On-disk layout of a training checkpoint directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "model.bin";
pub const OPTIMIZER_FILE: &str = "optim.bin";
pub const MANIFEST_FILE: &str = "state.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckpointManifestSchemaVersion {
    V1,
}

/// Step counter and model shape persisted next to the parameter records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointManifest {
    pub schema_version: CheckpointManifestSchemaVersion,
    pub global_step: u64,
    pub learning_rate: f64,
    pub base_filters: usize,
    pub depth: usize,
    pub saved_at_ms: u64,
}

impl CheckpointManifest {
    pub fn new(global_step: u64, learning_rate: f64, base_filters: usize, depth: usize) -> Self {
        let saved_at_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            schema_version: CheckpointManifestSchemaVersion::V1,
            global_step,
            learning_rate,
            base_filters,
            depth,
            saved_at_ms,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err("learning_rate must be positive".into());
        }
        if self.base_filters == 0 || self.depth == 0 {
            return Err("base_filters and depth must be non-zero".into());
        }
        Ok(())
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    pub fn save(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_in(dir);
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, data)?;
        Ok(path)
    }

    pub fn load(dir: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read(Self::path_in(dir))?;
        serde_json::from_slice(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

use crate::InferenceBackend;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::{Tensor, TensorData};
use data_contracts::checkpoint::MODEL_FILE;
use data_contracts::{CheckpointManifest, ContractError, HostBatch};
use models::{ModelError, UNet, UNetConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("failed to read checkpoint manifest in {dir}: {source}")]
    Manifest {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid checkpoint manifest: {0}")]
    InvalidManifest(String),
    #[error("failed to load model record {path}: {msg}")]
    Record { path: PathBuf, msg: String },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// A trained U-Net on the CPU inference backend.
///
/// Batch norm runs on running statistics since the backend has no autodiff.
pub struct Segmenter {
    model: UNet<InferenceBackend>,
    config: UNetConfig,
    global_step: u64,
    device: <InferenceBackend as burn::tensor::backend::Backend>::Device,
}

impl Segmenter {
    /// Load `model.bin` using the shape recorded in `state.json`.
    pub fn from_checkpoint(dir: &Path) -> Result<Self, InferenceError> {
        let manifest = CheckpointManifest::load(dir).map_err(|source| InferenceError::Manifest {
            dir: dir.to_path_buf(),
            source,
        })?;
        manifest.validate().map_err(InferenceError::InvalidManifest)?;
        let config = UNetConfig::from_manifest(&manifest);
        config.validate()?;

        let device = Default::default();
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let path = dir.join(MODEL_FILE);
        let model = UNet::<InferenceBackend>::new(config, &device)
            .load_file(path.clone(), &recorder, &device)
            .map_err(|e| InferenceError::Record {
                path,
                msg: e.to_string(),
            })?;
        log::info!(
            "[inference] loaded U-Net (base_filters={}, depth={}) at step {} from {}",
            config.base_filters,
            config.depth,
            manifest.global_step,
            dir.display()
        );
        Ok(Self {
            model,
            config,
            global_step: manifest.global_step,
            device,
        })
    }

    pub fn from_model(model: UNet<InferenceBackend>, global_step: u64) -> Self {
        let config = model.config.0;
        Self {
            model,
            config,
            global_step,
            device: Default::default(),
        }
    }

    pub fn config(&self) -> UNetConfig {
        self.config
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Class probabilities `[N, C, H, W]`.
    pub fn probabilities(
        &self,
        batch: &HostBatch,
    ) -> Result<Tensor<InferenceBackend, 4>, InferenceError> {
        batch.validate()?;
        self.config.check_spatial(batch.height, batch.width)?;
        let images = Tensor::<InferenceBackend, 4>::from_data(
            TensorData::new(batch.images.clone(), batch.image_dims()),
            &self.device,
        );
        Ok(self.model.forward_probs(images))
    }

    /// Most likely class per voxel, flattened `[N, H, W]`.
    pub fn segment(&self, batch: &HostBatch) -> Result<Vec<u8>, InferenceError> {
        let classes = self.probabilities(batch)?.argmax(1);
        Ok(classes
            .into_data()
            .iter::<i64>()
            .map(|c| c as u8)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Segmenter::from_checkpoint(dir.path()),
            Err(InferenceError::Manifest { .. })
        ));
    }

    #[test]
    fn indivisible_spatial_size_is_rejected() {
        let cfg = UNetConfig {
            base_filters: 2,
            depth: 2,
            ..Default::default()
        };
        let segmenter = Segmenter::from_model(UNet::new(cfg, &Default::default()), 0);
        let batch = HostBatch::zeros(1, 6, 8);
        assert!(matches!(
            segmenter.segment(&batch),
            Err(InferenceError::Model(ModelError::SpatialNotDivisible { .. }))
        ));
    }
}

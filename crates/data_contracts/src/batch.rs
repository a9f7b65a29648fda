use crate::layout::{NUM_CLASSES, NUM_MODALITIES};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ContractError {
    #[error("batch is empty (batch={batch}, height={height}, width={width})")]
    EmptyBatch {
        batch: usize,
        height: usize,
        width: usize,
    },
    #[error("{tensor} holds {actual} values, expected {expected}")]
    LengthMismatch {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("label voxel {voxel} is not one-hot (channel sum {sum})")]
    NotOneHot { voxel: usize, sum: f32 },
    #[error("mask voxel {voxel} is not binary: {value}")]
    NonBinaryMask { voxel: usize, value: f32 },
}

/// One mini-batch staged on the host, channels-first.
///
/// All three buffers share the leading batch dimension and the spatial extent.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBatch {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    /// `[batch, NUM_MODALITIES, height, width]`
    pub images: Vec<f32>,
    /// One-hot `[batch, NUM_CLASSES, height, width]`
    pub labels: Vec<f32>,
    /// Binary foreground mask `[batch, 1, height, width]`
    pub mask: Vec<f32>,
}

impl HostBatch {
    pub fn zeros(batch: usize, height: usize, width: usize) -> Self {
        let plane = height * width;
        Self {
            batch,
            height,
            width,
            images: vec![0.0; batch * NUM_MODALITIES * plane],
            labels: vec![0.0; batch * NUM_CLASSES * plane],
            mask: vec![0.0; batch * plane],
        }
    }

    pub fn image_dims(&self) -> [usize; 4] {
        [self.batch, NUM_MODALITIES, self.height, self.width]
    }

    pub fn label_dims(&self) -> [usize; 4] {
        [self.batch, NUM_CLASSES, self.height, self.width]
    }

    pub fn mask_dims(&self) -> [usize; 4] {
        [self.batch, 1, self.height, self.width]
    }

    /// Shape check: every buffer matches the declared batch and spatial extent.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.batch == 0 || self.height == 0 || self.width == 0 {
            return Err(ContractError::EmptyBatch {
                batch: self.batch,
                height: self.height,
                width: self.width,
            });
        }
        let checks = [
            ("images", &self.images, self.image_dims()),
            ("labels", &self.labels, self.label_dims()),
            ("mask", &self.mask, self.mask_dims()),
        ];
        for (tensor, data, dims) in checks {
            let expected: usize = dims.iter().product();
            if data.len() != expected {
                return Err(ContractError::LengthMismatch {
                    tensor,
                    expected,
                    actual: data.len(),
                });
            }
        }
        Ok(())
    }

    /// Value check on top of [`Self::validate`]: labels one-hot, mask in {0, 1}.
    pub fn validate_values(&self) -> Result<(), ContractError> {
        self.validate()?;
        let plane = self.height * self.width;
        for b in 0..self.batch {
            for p in 0..plane {
                let voxel = b * plane + p;
                let sum: f32 = (0..NUM_CLASSES)
                    .map(|c| self.labels[(b * NUM_CLASSES + c) * plane + p])
                    .sum();
                if (sum - 1.0).abs() > 1e-6 {
                    return Err(ContractError::NotOneHot { voxel, sum });
                }
                let value = self.mask[voxel];
                if value != 0.0 && value != 1.0 {
                    return Err(ContractError::NonBinaryMask { voxel, value });
                }
            }
        }
        Ok(())
    }
}

//! Host batches lifted onto a Burn device.

use crate::types::DatasetResult;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use data_contracts::HostBatch;

#[derive(Debug, Clone)]
pub struct SegBatch<B: Backend> {
    /// `[batch, 4, H, W]`
    pub images: Tensor<B, 4>,
    /// One-hot `[batch, 5, H, W]`
    pub labels: Tensor<B, 4>,
    /// `[batch, 1, H, W]`
    pub mask: Tensor<B, 4>,
}

impl<B: Backend> SegBatch<B> {
    pub fn from_host(host: &HostBatch, device: &B::Device) -> DatasetResult<Self> {
        host.validate()?;
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(host.images.clone(), host.image_dims()),
            device,
        );
        let labels = Tensor::<B, 4>::from_data(
            TensorData::new(host.labels.clone(), host.label_dims()),
            device,
        );
        let mask = Tensor::<B, 4>::from_data(
            TensorData::new(host.mask.clone(), host.mask_dims()),
            device,
        );
        Ok(Self {
            images,
            labels,
            mask,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

//! The four named inputs of a segmentation step.

use burn::tensor::{backend::Backend, Tensor};
use seg_dataset::SegBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Parameters are updated; batch norm uses batch statistics.
    Train,
    /// No update; batch norm uses running statistics.
    Infer,
}

impl Mode {
    pub fn is_training(self) -> bool {
        matches!(self, Mode::Train)
    }
}

#[derive(Debug, Clone)]
pub struct SegInputs<B: Backend> {
    /// `[N, 4, H, W]`
    pub images: Tensor<B, 4>,
    /// One-hot `[N, 5, H, W]`
    pub labels: Tensor<B, 4>,
    /// `[N, 1, H, W]`
    pub mask: Tensor<B, 4>,
    pub mode: Mode,
}

impl<B: Backend> SegInputs<B> {
    pub fn new(batch: SegBatch<B>, mode: Mode) -> Self {
        Self {
            images: batch.images,
            labels: batch.labels,
            mask: batch.mask,
            mode,
        }
    }
}

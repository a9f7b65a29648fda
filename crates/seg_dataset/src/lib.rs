//! Dataset loading and background batch feeding for MRI tumor segmentation.
//!
//! This crate provides utilities for:
//! - Loading preprocessed numpy splits (`images.npy`, `labels.npy`, `mask.npy`)
//! - Assembling channels-first, one-hot host batches
//! - Feeding batches from a worker pool through a bounded queue with a stop token
//! - Converting host batches into Burn tensors

pub mod arrays;
pub mod batch;
pub mod feeder;
pub mod types;

pub use arrays::{SplitArrays, IMAGES_FILE, LABELS_FILE, MASK_FILE};
pub use batch::SegBatch;
pub use feeder::{BatchFeeder, BatchSource, FeederConfig, StopToken};
pub use types::{DatasetResult, SegDatasetError};

use data_contracts::Split;
use std::path::Path;
use std::sync::Arc;

/// Load `<root>/<split>` and start feeding it in the background.
pub fn open_split_feeder(root: &Path, split: Split, cfg: FeederConfig) -> DatasetResult<BatchFeeder> {
    let arrays = SplitArrays::load(root, split)?;
    log::info!(
        "[dataset] {} split: {} samples of {}x{} from {}",
        split,
        arrays.len(),
        arrays.spatial().0,
        arrays.spatial().1,
        root.display()
    );
    BatchFeeder::spawn(Arc::new(arrays), cfg)
}

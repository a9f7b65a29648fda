//! Shared data contracts for MRI batches, dataset splits, and checkpoint manifests.

pub mod batch;
pub mod checkpoint;
pub mod layout;

pub use batch::{ContractError, HostBatch};
pub use checkpoint::{CheckpointManifest, CheckpointManifestSchemaVersion};
pub use layout::{Split, CLASS_NAMES, NUM_CLASSES, NUM_MODALITIES};

//! Error definitions for seg_dataset.

use data_contracts::{ContractError, Split};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, SegDatasetError>;

#[derive(Debug, Error)]
pub enum SegDatasetError {
    #[error("split directory missing: {path}")]
    MissingSplit { path: PathBuf },
    #[error("npy read error at {path}: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },
    #[error("shape mismatch in {split} split: {msg}")]
    Shape { split: Split, msg: String },
    #[error("invalid value in {split} split: {msg}")]
    Value { split: Split, msg: String },
    #[error("sample index {index} out of range for {len} samples")]
    Index { index: usize, len: usize },
    #[error("invalid feeder config: {0}")]
    Config(String),
    #[error("failed to spawn feeder worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("{split} feeder stopped")]
    Stopped { split: Split },
    #[error("{split} feeder workers exited")]
    Disconnected { split: Split },
    #[error(transparent)]
    Contract(#[from] ContractError),
}

use clap::Args;
use std::path::{Path, PathBuf};

/// Data and output directories shared by `train` and `eval`.
#[derive(Debug, Clone, Default, Args)]
pub struct RunDirArgs {
    /// Root holding `train/` and `valid/` numpy splits.
    #[arg(long)]
    pub data_root: Option<PathBuf>,
    /// Run directory for summaries (`train/`, `valid/`) and `checkpoint/`.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl RunDirArgs {
    pub fn data_root_or(&self, default: &Path) -> PathBuf {
        self.data_root
            .clone()
            .unwrap_or_else(|| default.to_path_buf())
    }

    pub fn output_dir_or(&self, default: &Path) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| default.to_path_buf())
    }

    /// `<output_dir>/checkpoint`
    pub fn checkpoint_dir_or(&self, default_output: &Path) -> PathBuf {
        self.output_dir_or(default_output).join("checkpoint")
    }
}

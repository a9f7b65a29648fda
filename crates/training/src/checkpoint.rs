//! Model + optimizer records and the step manifest, stored side by side.
//!
//! ```text
//! <output_dir>/checkpoint/model.bin   UNet record
//! <output_dir>/checkpoint/optim.bin   optimizer record
//! <output_dir>/checkpoint/state.json  CheckpointManifest
//! ```
//!
//! A save writes all three files into `<dir>.partial` and only then swaps that
//! directory into place, so `<dir>` never mixes records from two saves.

use anyhow::Context;
use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use data_contracts::checkpoint::{MODEL_FILE, OPTIMIZER_FILE};
use data_contracts::CheckpointManifest;
use models::UNet;
use std::fs;
use std::path::{Path, PathBuf};

pub fn save_checkpoint<B, O>(
    dir: &Path,
    model: &UNet<B>,
    optim: &O,
    manifest: &CheckpointManifest,
) -> anyhow::Result<PathBuf>
where
    B: AutodiffBackend,
    O: Optimizer<UNet<B>, B>,
{
    replace_dir(dir, |staging| {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(staging.join(MODEL_FILE), &recorder)
            .map_err(|e| anyhow::anyhow!("failed to save model checkpoint: {e}"))?;
        Recorder::<B>::record(&recorder, optim.to_record(), staging.join(OPTIMIZER_FILE))
            .map_err(|e| anyhow::anyhow!("failed to save optimizer checkpoint: {e}"))?;
        manifest
            .save(staging)
            .with_context(|| format!("writing checkpoint manifest in {}", staging.display()))?;
        Ok(())
    })?;
    log::debug!(
        "[checkpoint] step {} saved to {}",
        manifest.global_step,
        dir.display()
    );
    Ok(dir.to_path_buf())
}

fn sibling(dir: &Path, suffix: &str) -> anyhow::Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("checkpoint dir {} has no final component", dir.display()))?;
    let mut name = name.to_os_string();
    name.push(suffix);
    Ok(dir.with_file_name(name))
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Fills a fresh staging directory with `write` and renames it to `dir`.
///
/// On failure the staging directory is removed and `dir` keeps its previous contents.
pub(crate) fn replace_dir<F>(dir: &Path, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&Path) -> anyhow::Result<()>,
{
    let staging = sibling(dir, ".partial")?;
    let previous = sibling(dir, ".previous")?;
    remove_if_present(&staging)
        .with_context(|| format!("clearing stale {}", staging.display()))?;
    fs::create_dir_all(&staging)
        .with_context(|| format!("creating checkpoint dir {}", staging.display()))?;
    if let Err(e) = write(&staging) {
        if let Err(cleanup) = remove_if_present(&staging) {
            log::warn!("[checkpoint] could not remove {}: {cleanup}", staging.display());
        }
        return Err(e);
    }

    remove_if_present(&previous)
        .with_context(|| format!("clearing stale {}", previous.display()))?;
    if dir.exists() {
        fs::rename(dir, &previous)
            .with_context(|| format!("moving aside {}", dir.display()))?;
    }
    fs::rename(&staging, dir)
        .with_context(|| format!("moving {} into place", staging.display()))?;
    if let Err(e) = remove_if_present(&previous) {
        log::warn!("[checkpoint] could not remove {}: {e}", previous.display());
    }
    Ok(())
}

/// Restores model and optimizer state written by [`save_checkpoint`].
pub fn load_checkpoint<B, O>(
    dir: &Path,
    model: UNet<B>,
    optim: O,
    device: &B::Device,
) -> anyhow::Result<(UNet<B>, O, CheckpointManifest)>
where
    B: AutodiffBackend,
    O: Optimizer<UNet<B>, B>,
{
    let manifest = CheckpointManifest::load(dir)
        .with_context(|| format!("reading checkpoint manifest in {}", dir.display()))?;
    manifest
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid checkpoint manifest: {e}"))?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = model
        .load_file(dir.join(MODEL_FILE), &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load model checkpoint: {e}"))?;
    let record = Recorder::<B>::load(&recorder, dir.join(OPTIMIZER_FILE), device)
        .map_err(|e| anyhow::anyhow!("failed to load optimizer checkpoint: {e}"))?;
    let optim = optim.load_record(record);
    Ok((model, optim, manifest))
}

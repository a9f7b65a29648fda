//! The training loop.
//!
//! Every iteration fetches a training batch, runs one optimizer step, writes
//! the step summary at the current global step and folds the metrics into
//! the EMA tracker. Iterations with `i % validate_every == 0` (including the
//! first) additionally evaluate one validation batch without updating
//! parameters.
//!
//! Termination always writes the checkpoint: once after the last iteration
//! and again in the cleanup path, which also stops and joins both batch
//! sources and runs whether or not the loop failed.

use crate::loss::DiceMetrics;
use crate::metrics::EmaTracker;
use crate::summary::{Summary, SummarySink};
use anyhow::Context;
use data_contracts::{HostBatch, Split};
use seg_dataset::BatchSource;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub metrics: DiceMetrics,
    pub summary: Summary,
}

/// Handles to the model, optimizer and objective driven by [`run_training`].
pub trait TrainOps {
    /// One parameter update.
    fn train_step(&mut self, batch: HostBatch) -> anyhow::Result<StepOutput>;
    /// Inference-mode scoring; parameters are left untouched.
    fn evaluate(&mut self, batch: HostBatch) -> anyhow::Result<StepOutput>;
    fn global_step(&self) -> u64;
    fn save_checkpoint(&self, dir: &Path) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub iterations: usize,
    pub validate_every: usize,
    /// Indices into `METRIC_NAMES` shown in the status line.
    pub status_metrics: Vec<usize>,
    pub checkpoint_dir: PathBuf,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            validate_every: 10,
            status_metrics: vec![0, 2, 3, 4, 5],
            checkpoint_dir: PathBuf::from("runs/unet/checkpoint"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub iterations: usize,
    pub validations: usize,
    pub train_summaries: usize,
    pub valid_summaries: usize,
    pub checkpoint_writes: usize,
    pub checkpoint: Option<PathBuf>,
}

pub fn run_training<O, T, V, S>(
    ops: &mut O,
    train: &mut T,
    valid: &mut V,
    sinks: &mut S,
    ema: &mut EmaTracker,
    cfg: &LoopConfig,
) -> anyhow::Result<LoopReport>
where
    O: TrainOps + ?Sized,
    T: BatchSource + ?Sized,
    V: BatchSource + ?Sized,
    S: SummarySink + ?Sized,
{
    let mut report = LoopReport::default();
    let outcome = run_iterations(ops, train, valid, sinks, ema, cfg, &mut report).and_then(|()| {
        let path = ops.save_checkpoint(&cfg.checkpoint_dir)?;
        report.checkpoint_writes += 1;
        log::info!(
            "[train] checkpoint at step {} written to {}",
            ops.global_step(),
            path.display()
        );
        report.checkpoint = Some(path);
        Ok(())
    });

    // Cleanup: runs on success and on failure.
    train.shutdown();
    valid.shutdown();
    if let Err(e) = sinks.flush() {
        log::warn!("[train] summary flush failed: {e:#}");
    }
    let cleanup = ops.save_checkpoint(&cfg.checkpoint_dir);

    match (outcome, cleanup) {
        (Ok(()), Ok(path)) => {
            report.checkpoint_writes += 1;
            report.checkpoint = Some(path);
            Ok(report)
        }
        (Ok(()), Err(e)) => Err(e.context("writing final checkpoint")),
        (Err(e), Ok(path)) => {
            log::warn!(
                "[train] stopped at step {} after error; checkpoint written to {}",
                ops.global_step(),
                path.display()
            );
            Err(e)
        }
        (Err(e), Err(cleanup_err)) => {
            log::error!("[train] checkpoint after error also failed: {cleanup_err:#}");
            Err(e)
        }
    }
}

fn run_iterations<O, T, V, S>(
    ops: &mut O,
    train: &mut T,
    valid: &mut V,
    sinks: &mut S,
    ema: &mut EmaTracker,
    cfg: &LoopConfig,
    report: &mut LoopReport,
) -> anyhow::Result<()>
where
    O: TrainOps + ?Sized,
    T: BatchSource + ?Sized,
    V: BatchSource + ?Sized,
    S: SummarySink + ?Sized,
{
    anyhow::ensure!(cfg.validate_every > 0, "validate_every must be > 0");
    for i in 0..cfg.iterations {
        let batch = train
            .next_batch()
            .with_context(|| format!("fetching training batch at iteration {i}"))?;
        let out = ops
            .train_step(batch)
            .with_context(|| format!("train step at iteration {i}"))?;
        sinks.write(Split::Train, &out.summary, ops.global_step())?;
        report.train_summaries += 1;
        ema.update(Split::Train, &out.metrics.named());
        log::info!("{}", ema.status_line(i, &cfg.status_metrics));

        if i % cfg.validate_every == 0 {
            let batch = valid
                .next_batch()
                .with_context(|| format!("fetching validation batch at iteration {i}"))?;
            let out = ops
                .evaluate(batch)
                .with_context(|| format!("validation at iteration {i}"))?;
            sinks.write(Split::Valid, &out.summary, ops.global_step())?;
            report.valid_summaries += 1;
            ema.update(Split::Valid, &out.metrics.named());
            report.validations += 1;
        }
        report.iterations += 1;
    }
    Ok(())
}

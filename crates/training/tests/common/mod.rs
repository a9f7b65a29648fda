#![allow(dead_code)]

use anyhow::bail;
use burn::tensor::{backend::Backend, Tensor};
use data_contracts::{HostBatch, Split, NUM_CLASSES};
use seg_dataset::{BatchSource, DatasetResult, SegDatasetError};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use training::{
    DiceMetrics, DiceOutput, SegmentationObjective, StepOutput, Summary, SummarySink, TrainOps,
};

pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Endless zero-filled batches; optionally fails after `fail_after` fetches.
pub struct ZeroSource {
    pub split: Split,
    pub batch: usize,
    pub size: usize,
    pub fetched: usize,
    pub fail_after: Option<usize>,
    pub shutdowns: usize,
}

impl ZeroSource {
    pub fn new(split: Split, batch: usize, size: usize) -> Self {
        Self {
            split,
            batch,
            size,
            fetched: 0,
            fail_after: None,
            shutdowns: 0,
        }
    }
}

impl BatchSource for ZeroSource {
    fn next_batch(&mut self) -> DatasetResult<HostBatch> {
        if self.shutdowns > 0 {
            return Err(SegDatasetError::Stopped { split: self.split });
        }
        if self.fail_after == Some(self.fetched) {
            return Err(SegDatasetError::Disconnected { split: self.split });
        }
        self.fetched += 1;
        Ok(HostBatch::zeros(self.batch, self.size, self.size))
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub writes: Vec<(Split, u64, Summary)>,
    pub flushes: usize,
}

impl RecordingSink {
    pub fn steps(&self, split: Split) -> Vec<u64> {
        self.writes
            .iter()
            .filter(|(s, _, _)| *s == split)
            .map(|(_, step, _)| *step)
            .collect()
    }
}

impl SummarySink for RecordingSink {
    fn write(&mut self, split: Split, summary: &Summary, step: u64) -> anyhow::Result<()> {
        self.writes.push((split, step, summary.clone()));
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Counts calls and writes `state.txt` as its checkpoint.
pub struct StubOps {
    pub step: u64,
    pub fail_at_step: Option<u64>,
    pub evaluated_at: Vec<u64>,
    pub checkpoint_writes: Cell<usize>,
    pub score: f32,
}

impl StubOps {
    pub fn new() -> Self {
        Self {
            step: 0,
            fail_at_step: None,
            evaluated_at: Vec::new(),
            checkpoint_writes: Cell::new(0),
            score: 0.5,
        }
    }

    fn output(&self) -> StepOutput {
        let metrics = DiceMetrics {
            aggregate: self.score,
            per_class: [self.score; NUM_CLASSES],
        };
        let mut summary = Summary::default();
        for (name, value) in metrics.named() {
            summary.push_scalar(name, value);
        }
        StepOutput { metrics, summary }
    }
}

impl TrainOps for StubOps {
    fn train_step(&mut self, batch: HostBatch) -> anyhow::Result<StepOutput> {
        batch.validate()?;
        if self.fail_at_step == Some(self.step) {
            bail!("injected failure at step {}", self.step);
        }
        self.step += 1;
        Ok(self.output())
    }

    fn evaluate(&mut self, batch: HostBatch) -> anyhow::Result<StepOutput> {
        batch.validate()?;
        self.evaluated_at.push(self.step);
        Ok(self.output())
    }

    fn global_step(&self) -> u64 {
        self.step
    }

    fn save_checkpoint(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("state.txt");
        std::fs::write(&path, format!("step {}\n", self.step))?;
        self.checkpoint_writes.set(self.checkpoint_writes.get() + 1);
        Ok(path)
    }
}

/// Constant score wired to the prediction so gradients exist but are zero.
pub struct FixedScore(pub f32);

impl SegmentationObjective for FixedScore {
    fn evaluate<B: Backend>(&self, prediction: Tensor<B, 4>, _target: Tensor<B, 4>) -> DiceOutput<B> {
        let device = prediction.device();
        DiceOutput {
            aggregate: prediction.sum().mul_scalar(0.0).add_scalar(self.0),
            per_class: Tensor::zeros([NUM_CLASSES], &device),
        }
    }
}

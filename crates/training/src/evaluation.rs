//! Scoring a trained checkpoint over a whole split.

use crate::loss::{DiceMetrics, SegmentationObjective};
use crate::masking::apply_mask;
use anyhow::Context;
use data_contracts::{HostBatch, NUM_CLASSES};
use inference::{InferenceBackend, Segmenter};
use seg_dataset::{SegBatch, SplitArrays};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitScore {
    pub samples: usize,
    pub global_step: u64,
    /// Per-batch scores averaged with each batch weighted by its sample count.
    pub mean: DiceMetrics,
}

/// Masked scores of one batch under the segmenter's probabilities.
pub fn score_host_batch<L: SegmentationObjective>(
    segmenter: &Segmenter,
    batch: &HostBatch,
    objective: &L,
) -> anyhow::Result<DiceMetrics> {
    let probs = segmenter.probabilities(batch)?;
    let tensors = SegBatch::<InferenceBackend>::from_host(batch, &Default::default())?;
    let (prediction, target) = apply_mask(probs, tensors.labels, tensors.mask);
    objective.evaluate(prediction, target).to_metrics()
}

/// Walks the split in order, `batch_size` samples at a time; the last batch may be short.
pub fn evaluate_split<L: SegmentationObjective>(
    segmenter: &Segmenter,
    arrays: &SplitArrays,
    batch_size: usize,
    objective: &L,
) -> anyhow::Result<SplitScore> {
    anyhow::ensure!(batch_size > 0, "batch_size must be > 0");
    anyhow::ensure!(!arrays.is_empty(), "{} split is empty", arrays.split());

    let mut weighted = [0f64; NUM_CLASSES + 1];
    let indices: Vec<usize> = (0..arrays.len()).collect();
    for (i, chunk) in indices.chunks(batch_size).enumerate() {
        let batch = arrays.assemble(chunk)?;
        let metrics = score_host_batch(segmenter, &batch, objective)
            .with_context(|| format!("scoring {} batch {i}", arrays.split()))?;
        for (acc, v) in weighted.iter_mut().zip(metrics.values()) {
            *acc += f64::from(v) * chunk.len() as f64;
        }
    }

    let samples = arrays.len();
    let mean = weighted.map(|v| (v / samples as f64) as f32);
    let mut per_class = [0.0; NUM_CLASSES];
    per_class.copy_from_slice(&mean[1..]);
    log::debug!(
        "[eval] {} {} samples at step {}: dice={:.4}",
        samples,
        arrays.split(),
        segmenter.global_step(),
        mean[0]
    );
    Ok(SplitScore {
        samples,
        global_step: segmenter.global_step(),
        mean: DiceMetrics {
            aggregate: mean[0],
            per_class,
        },
    })
}

//! [`TrainOps`] over a Burn U-Net, an optimizer and a segmentation objective.

use crate::checkpoint::{load_checkpoint, save_checkpoint};
use crate::inputs::{Mode, SegInputs};
use crate::loss::{host_values, DiceMetrics, DiceOutput, SegmentationObjective};
use crate::masking::apply_mask;
use crate::runner::{StepOutput, TrainOps};
use crate::summary::{Histogram, Summary};
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use data_contracts::{CheckpointManifest, HostBatch};
use models::{UNet, UNetConfig};
use seg_dataset::SegBatch;
use std::path::{Path, PathBuf};

const HISTOGRAM_BUCKETS: usize = 30;

/// Output of one forward pass through model, masking and objective.
pub struct Scored<B: Backend> {
    pub dice: DiceOutput<B>,
    /// Unmasked class probabilities `[N, C, H, W]`.
    pub probs: Tensor<B, 4>,
    pub mode: Mode,
}

/// Forward → softmax → mask → objective.
pub fn score<B: Backend, L: SegmentationObjective>(
    model: &UNet<B>,
    inputs: SegInputs<B>,
    objective: &L,
) -> Scored<B> {
    let probs = model.forward_probs(inputs.images);
    let (prediction, target) = apply_mask(probs.clone(), inputs.labels, inputs.mask);
    Scored {
        dice: objective.evaluate(prediction, target),
        probs,
        mode: inputs.mode,
    }
}

pub struct UNetTrainer<B: AutodiffBackend, O, L> {
    model: UNet<B>,
    optim: O,
    objective: L,
    config: UNetConfig,
    learning_rate: f64,
    step: u64,
    device: B::Device,
}

impl<B, O, L> UNetTrainer<B, O, L>
where
    B: AutodiffBackend,
    O: Optimizer<UNet<B>, B>,
    L: SegmentationObjective,
{
    pub fn new(
        config: UNetConfig,
        optim: O,
        objective: L,
        learning_rate: f64,
        device: B::Device,
    ) -> Self {
        Self {
            model: UNet::new(config, &device),
            optim,
            objective,
            config,
            learning_rate,
            step: 0,
            device,
        }
    }

    /// Restore model, optimizer and step counter from `dir`.
    pub fn resume(self, dir: &Path) -> anyhow::Result<Self> {
        let manifest = CheckpointManifest::load(dir).map_err(|e| {
            anyhow::anyhow!("no checkpoint manifest in {}: {e}", dir.display())
        })?;
        if manifest.base_filters != self.config.base_filters || manifest.depth != self.config.depth
        {
            anyhow::bail!(
                "checkpoint in {} was trained with base_filters={} depth={}, config has base_filters={} depth={}",
                dir.display(),
                manifest.base_filters,
                manifest.depth,
                self.config.base_filters,
                self.config.depth
            );
        }
        let (model, optim, manifest) = load_checkpoint(dir, self.model, self.optim, &self.device)?;
        log::info!(
            "[train] resumed from {} at step {}",
            dir.display(),
            manifest.global_step
        );
        Ok(Self {
            model,
            optim,
            step: manifest.global_step,
            ..self
        })
    }

    pub fn model(&self) -> &UNet<B> {
        &self.model
    }

    fn check_batch(&self, batch: &HostBatch) -> anyhow::Result<()> {
        self.config.check_spatial(batch.height, batch.width)?;
        Ok(())
    }

    fn summarize<BK: Backend>(
        &self,
        scored: &Scored<BK>,
        metrics: &DiceMetrics,
        weights: Option<Tensor<BK, 4>>,
    ) -> anyhow::Result<Summary> {
        let mut summary = Summary::default();
        for (name, value) in metrics.named() {
            summary.push_scalar(name, value);
        }
        summary.push_scalar("loss", -metrics.aggregate);
        if scored.mode.is_training() {
            summary.push_scalar("learning_rate", self.learning_rate as f32);
        }

        let [n, _, h, w] = scored.probs.dims();
        let background = host_values(scored.probs.clone().slice([0..n, 0..1, 0..h, 0..w]))?;
        let foreground: Vec<f32> = background.into_iter().map(|p| 1.0 - p).collect();
        if let Some(h) = Histogram::from_values(&foreground, HISTOGRAM_BUCKETS) {
            summary.push_histogram("foreground_probability", h);
        }
        if let Some(weights) = weights {
            let values = host_values(weights)?;
            if let Some(h) = Histogram::from_values(&values, HISTOGRAM_BUCKETS) {
                summary.push_histogram("first_conv_weights", h);
            }
        }
        Ok(summary)
    }

    fn manifest(&self) -> CheckpointManifest {
        CheckpointManifest::new(
            self.step,
            self.learning_rate,
            self.config.base_filters,
            self.config.depth,
        )
    }
}

impl<B, O, L> TrainOps for UNetTrainer<B, O, L>
where
    B: AutodiffBackend,
    O: Optimizer<UNet<B>, B>,
    L: SegmentationObjective,
{
    fn train_step(&mut self, batch: HostBatch) -> anyhow::Result<StepOutput> {
        self.check_batch(&batch)?;
        let batch = SegBatch::<B>::from_host(&batch, &self.device)?;
        let scored = score(&self.model, SegInputs::new(batch, Mode::Train), &self.objective);

        let loss = scored.dice.objective();
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .optim
            .step(self.learning_rate, self.model.clone(), grads);
        self.step += 1;

        let metrics = scored.dice.to_metrics()?;
        let summary = self.summarize(&scored, &metrics, self.model.first_conv_weights())?;
        Ok(StepOutput { metrics, summary })
    }

    fn evaluate(&mut self, batch: HostBatch) -> anyhow::Result<StepOutput> {
        self.check_batch(&batch)?;
        let model = self.model.valid();
        let batch = SegBatch::<B::InnerBackend>::from_host(&batch, &self.device)?;
        let scored = score(&model, SegInputs::new(batch, Mode::Infer), &self.objective);
        let metrics = scored.dice.to_metrics()?;
        let summary = self.summarize(&scored, &metrics, model.first_conv_weights())?;
        Ok(StepOutput { metrics, summary })
    }

    fn global_step(&self) -> u64 {
        self.step
    }

    fn save_checkpoint(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        save_checkpoint(dir, &self.model, &self.optim, &self.manifest())
    }
}

//! Dice objective: a differentiable aggregate score plus its per-class breakdown.

use burn::tensor::{backend::Backend, Tensor};
use data_contracts::NUM_CLASSES;

/// Metric names in reporting order: the aggregate first, then one per class.
pub const METRIC_NAMES: [&str; NUM_CLASSES + 1] =
    ["dice", "dice_0", "dice_1", "dice_2", "dice_3", "dice_4"];

/// Scores a prediction against a target of the same `[N, C, H, W]` shape.
pub trait SegmentationObjective {
    fn evaluate<B: Backend>(&self, prediction: Tensor<B, 4>, target: Tensor<B, 4>)
        -> DiceOutput<B>;
}

#[derive(Debug, Clone)]
pub struct DiceOutput<B: Backend> {
    /// Shape `[1]`.
    pub aggregate: Tensor<B, 1>,
    /// Shape `[C]`.
    pub per_class: Tensor<B, 1>,
}

impl<B: Backend> DiceOutput<B> {
    /// The value minimised by the optimizer.
    pub fn objective(&self) -> Tensor<B, 1> {
        self.aggregate.clone().neg()
    }

    /// Host copy of the scores, converted to `f32` whatever the backend's float type.
    pub fn to_metrics(&self) -> anyhow::Result<DiceMetrics> {
        let aggregate = first_value(self.aggregate.clone())?;
        let values = host_values(self.per_class.clone())?;
        anyhow::ensure!(
            values.len() == NUM_CLASSES,
            "expected {NUM_CLASSES} per-class scores, got {}",
            values.len()
        );
        let mut per_class = [0.0; NUM_CLASSES];
        per_class.copy_from_slice(&values);
        Ok(DiceMetrics {
            aggregate,
            per_class,
        })
    }
}

/// Copies a tensor to the host as `f32`.
pub(crate) fn host_values<B: Backend, const D: usize>(
    t: Tensor<B, D>,
) -> anyhow::Result<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("copying tensor to host: {e:?}"))
}

pub(crate) fn first_value<B: Backend>(t: Tensor<B, 1>) -> anyhow::Result<f32> {
    host_values(t)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty tensor"))
}

/// Smoothed soft Dice per class, pooled over batch and spatial axes.
#[derive(Debug, Clone, Copy)]
pub struct SoftDice {
    pub smooth: f32,
}

impl Default for SoftDice {
    fn default() -> Self {
        Self { smooth: 1.0 }
    }
}

impl SegmentationObjective for SoftDice {
    fn evaluate<B: Backend>(
        &self,
        prediction: Tensor<B, 4>,
        target: Tensor<B, 4>,
    ) -> DiceOutput<B> {
        let [n, c, h, w] = prediction.dims();
        let p = prediction.swap_dims(0, 1).reshape([c, n * h * w]);
        let t = target.swap_dims(0, 1).reshape([c, n * h * w]);
        let intersection = (p.clone() * t.clone()).sum_dim(1).reshape([c]);
        let denominator = (p.sum_dim(1) + t.sum_dim(1)).reshape([c]);
        let per_class = intersection
            .mul_scalar(2.0)
            .add_scalar(self.smooth)
            .div(denominator.add_scalar(self.smooth));
        DiceOutput {
            aggregate: per_class.clone().mean(),
            per_class,
        }
    }
}

/// Host copy of one evaluation's scores.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiceMetrics {
    pub aggregate: f32,
    pub per_class: [f32; NUM_CLASSES],
}

impl DiceMetrics {
    pub fn names() -> &'static [&'static str] {
        &METRIC_NAMES
    }

    /// Values aligned with [`METRIC_NAMES`].
    pub fn values(&self) -> [f32; NUM_CLASSES + 1] {
        let mut out = [self.aggregate; NUM_CLASSES + 1];
        out[1..].copy_from_slice(&self.per_class);
        out
    }

    pub fn named(&self) -> Vec<(&'static str, f32)> {
        METRIC_NAMES.iter().copied().zip(self.values()).collect()
    }
}

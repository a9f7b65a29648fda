//! Burn U-Net for multi-modal MRI tumor segmentation.
//!
//! Shapes:
//! - Input images: `[B, in_channels, H, W]`
//! - Logits / probabilities: `[B, num_classes, H, W]`
//!
//! `H` and `W` must be divisible by `2^depth`; see [`UNetConfig::check_spatial`].
//! These are pure Burn modules. Checkpoint loading lives in `inference` and
//! `training`.

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::{backend::Backend, Tensor};
use data_contracts::{CheckpointManifest, NUM_CLASSES, NUM_MODALITIES};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("spatial size {height}x{width} is not divisible by {factor} (2^depth)")]
    SpatialNotDivisible {
        height: usize,
        width: usize,
        factor: usize,
    },
    #[error("invalid U-Net config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UNetConfig {
    pub in_channels: usize,
    pub num_classes: usize,
    /// Filters in the first encoder stage; doubled at every level.
    pub base_filters: usize,
    /// Number of down-sampling stages.
    pub depth: usize,
}

impl Default for UNetConfig {
    fn default() -> Self {
        Self {
            in_channels: NUM_MODALITIES,
            num_classes: NUM_CLASSES,
            base_filters: 16,
            depth: 3,
        }
    }
}

impl UNetConfig {
    pub fn from_manifest(manifest: &CheckpointManifest) -> Self {
        Self {
            base_filters: manifest.base_filters,
            depth: manifest.depth,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.in_channels == 0 || self.num_classes == 0 {
            return Err(ModelError::InvalidConfig(
                "in_channels and num_classes must be non-zero".into(),
            ));
        }
        if self.base_filters == 0 {
            return Err(ModelError::InvalidConfig("base_filters must be > 0".into()));
        }
        if self.depth == 0 || self.depth > 8 {
            return Err(ModelError::InvalidConfig(format!(
                "depth must be in 1..=8, got {}",
                self.depth
            )));
        }
        Ok(())
    }

    pub fn spatial_factor(&self) -> usize {
        1 << self.depth
    }

    pub fn check_spatial(&self, height: usize, width: usize) -> Result<(), ModelError> {
        let factor = self.spatial_factor();
        if height == 0 || width == 0 || height % factor != 0 || width % factor != 0 {
            return Err(ModelError::SpatialNotDivisible {
                height,
                width,
                factor,
            });
        }
        Ok(())
    }

    /// Output channels of encoder stage `level`.
    fn filters(&self, level: usize) -> usize {
        self.base_filters << level
    }
}

/// Two 3x3 conv + batch-norm + ReLU layers.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |input| {
            Conv2dConfig::new([input, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        Self {
            conv1: conv(in_channels),
            norm1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv(out_channels),
            norm2: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(input)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoders: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
    bottleneck: ConvBlock<B>,
    /// Deepest level first.
    upsamplers: Vec<ConvTranspose2d<B>>,
    /// Deepest level first, paired with `upsamplers`.
    decoders: Vec<ConvBlock<B>>,
    head: Conv2d<B>,
    pub config: Ignored<UNetConfig>,
}

impl<B: Backend> UNet<B> {
    pub fn new(config: UNetConfig, device: &B::Device) -> Self {
        let mut encoders = Vec::with_capacity(config.depth);
        let mut channels = config.in_channels;
        for level in 0..config.depth {
            encoders.push(ConvBlock::new(channels, config.filters(level), device));
            channels = config.filters(level);
        }
        let bottleneck = ConvBlock::new(channels, config.filters(config.depth), device);

        let mut upsamplers = Vec::with_capacity(config.depth);
        let mut decoders = Vec::with_capacity(config.depth);
        for level in (0..config.depth).rev() {
            let below = config.filters(level + 1);
            let here = config.filters(level);
            upsamplers.push(
                ConvTranspose2dConfig::new([below, here], [2, 2])
                    .with_stride([2, 2])
                    .init(device),
            );
            // Upsampled features concatenated with the skip connection.
            decoders.push(ConvBlock::new(here * 2, here, device));
        }

        let head = Conv2dConfig::new([config.filters(0), config.num_classes], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        Self {
            encoders,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck,
            upsamplers,
            decoders,
            head,
            config: Ignored(config),
        }
    }

    /// Per-voxel class logits.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = images;
        for encoder in &self.encoders {
            let features = encoder.forward(x);
            x = self.pool.forward(features.clone());
            skips.push(features);
        }
        x = self.bottleneck.forward(x);
        for (up, decoder) in self.upsamplers.iter().zip(&self.decoders) {
            let upsampled = up.forward(x.clone());
            let skip = match skips.pop() {
                Some(skip) => skip,
                None => break,
            };
            x = decoder.forward(Tensor::cat(vec![upsampled, skip], 1));
        }
        self.head.forward(x)
    }

    /// Softmax over the class axis.
    pub fn forward_probs(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        softmax(self.forward(images), 1)
    }

    /// Weights of the first encoder convolution, `[filters, in_channels, 3, 3]`.
    pub fn first_conv_weights(&self) -> Option<Tensor<B, 4>> {
        self.encoders.first().map(|block| block.conv1.weight.val())
    }
}

pub mod prelude {
    pub use super::{ConvBlock, ModelError, UNet, UNetConfig};
}

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod evaluation;
pub mod inputs;
pub mod loss;
pub mod masking;
pub mod metrics;
pub mod runner;
pub mod summary;
pub mod trainer;
pub mod util;

pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use config::{ConfigError, TrainConfig, TrainConfigFile};
pub use evaluation::{evaluate_split, score_host_batch, SplitScore};
pub use inputs::{Mode, SegInputs};
pub use loss::{DiceMetrics, DiceOutput, SegmentationObjective, SoftDice, METRIC_NAMES};
pub use masking::apply_mask;
pub use metrics::EmaTracker;
pub use models::{UNet, UNetConfig};
pub use runner::{run_training, LoopConfig, LoopReport, StepOutput, TrainOps};
pub use summary::{Histogram, JsonlSink, Summary, SummarySink, SummarySinks, TensorBoardSink};
pub use trainer::{score, Scored, UNetTrainer};
pub use util::{run_train, train_with_config, TrainArgs};

/// Backend for training and evaluation.
pub type TrainBackend = burn::backend::NdArray<f32>;
pub type ADBackend = burn::backend::Autodiff<TrainBackend>;

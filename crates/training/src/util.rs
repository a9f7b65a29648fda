use crate::config::{ConfigError, TrainConfig, TrainConfigFile};
use crate::loss::SoftDice;
use crate::metrics::EmaTracker;
use crate::runner::{run_training, LoopReport};
use crate::summary::{JsonlSink, SummarySinks, TensorBoardSink};
use crate::trainer::UNetTrainer;
use crate::ADBackend;
use anyhow::Context;
use burn::optim::AdamConfig;
use clap::Parser;
use cli_support::common::RunDirArgs;
use data_contracts::Split;
use models::UNet;
use seg_dataset::open_split_feeder;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(
    name = "train",
    about = "Train a U-Net brain tumor segmenter with soft Dice loss"
)]
pub struct TrainArgs {
    /// TOML file with training settings; flags given here override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub dirs: RunDirArgs,
    /// Number of training iterations.
    #[arg(long)]
    pub iterations: Option<usize>,
    /// Samples per batch.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Adam learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Evaluate a validation batch every N iterations (including iteration 0).
    #[arg(long)]
    pub validate_every: Option<usize>,
    /// Metric indices shown in the status line (0 = aggregate dice, 1..=5 = per class).
    #[arg(long, value_delimiter = ',')]
    pub status_metrics: Option<Vec<usize>>,
    /// Decay of the moving-average metrics.
    #[arg(long)]
    pub ema_decay: Option<f32>,
    /// Seed for batch sampling.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Background feeder threads per split.
    #[arg(long)]
    pub feeder_threads: Option<usize>,
    /// Bounded queue capacity (batches) per split.
    #[arg(long)]
    pub queue_capacity: Option<usize>,
    /// Filters in the first U-Net stage.
    #[arg(long)]
    pub base_filters: Option<usize>,
    /// Number of U-Net down-sampling stages.
    #[arg(long)]
    pub depth: Option<usize>,
    /// Resume from `<output_dir>/checkpoint`.
    #[arg(long, default_value_t = false)]
    pub resume: bool,
    /// Also append every summary as a JSON line to this file.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

impl TrainArgs {
    /// Defaults, then the `--config` file, then flags.
    pub fn resolve(&self) -> Result<TrainConfig, ConfigError> {
        let mut cfg = TrainConfig::default();
        if let Some(path) = &self.config {
            cfg.apply_file(TrainConfigFile::from_path(path)?);
        }
        if let Some(v) = &self.dirs.data_root {
            cfg.data_root = v.clone();
        }
        if let Some(v) = &self.dirs.output_dir {
            cfg.output_dir = v.clone();
        }
        if let Some(v) = self.iterations {
            cfg.iterations = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.lr {
            cfg.learning_rate = v;
        }
        if let Some(v) = self.validate_every {
            cfg.validate_every = v;
        }
        if let Some(v) = &self.status_metrics {
            cfg.status_metrics = v.clone();
        }
        if let Some(v) = self.ema_decay {
            cfg.ema_decay = v;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        if let Some(v) = self.feeder_threads {
            cfg.feeder_threads = v;
        }
        if let Some(v) = self.queue_capacity {
            cfg.queue_capacity = v;
        }
        if let Some(v) = self.base_filters {
            cfg.base_filters = v;
        }
        if let Some(v) = self.depth {
            cfg.depth = v;
        }
        if self.resume {
            cfg.resume = true;
        }
        if let Some(v) = &self.metrics_out {
            cfg.metrics_out = Some(v.clone());
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<LoopReport> {
    let cfg = args.resolve()?;
    train_with_config(&cfg)
}

pub fn train_with_config(cfg: &TrainConfig) -> anyhow::Result<LoopReport> {
    cfg.validate()?;
    log::info!(
        "[train] {} iterations, batch_size={}, lr={}, data={}, output={}",
        cfg.iterations,
        cfg.batch_size,
        cfg.learning_rate,
        cfg.data_root.display(),
        cfg.output_dir.display()
    );

    let mut train_source =
        open_split_feeder(&cfg.data_root, Split::Train, cfg.feeder_config(Split::Train))
            .context("opening training split")?;
    let mut valid_source =
        open_split_feeder(&cfg.data_root, Split::Valid, cfg.feeder_config(Split::Valid))
            .context("opening validation split")?;
    let spatial = train_source.spatial();
    anyhow::ensure!(
        valid_source.spatial() == spatial,
        "validation slices are {:?} but training slices are {:?}; both splits must share one spatial size",
        valid_source.spatial(),
        spatial
    );
    cfg.unet_config()
        .check_spatial(spatial.0, spatial.1)
        .context("training slices do not fit the configured U-Net depth")?;

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let mut trainer = UNetTrainer::<ADBackend, _, _>::new(
        cfg.unet_config(),
        AdamConfig::new().init::<ADBackend, UNet<ADBackend>>(),
        SoftDice::default(),
        cfg.learning_rate,
        device,
    );
    if cfg.resume {
        trainer = trainer.resume(&cfg.checkpoint_dir())?;
    }

    let mut sinks = SummarySinks::new();
    sinks.push(TensorBoardSink::new(
        &cfg.log_dir(Split::Train),
        &cfg.log_dir(Split::Valid),
    )?);
    if let Some(path) = &cfg.metrics_out {
        sinks.push(JsonlSink::open(path)?);
    }
    let mut ema = EmaTracker::new(cfg.ema_decay);

    let report = run_training(
        &mut trainer,
        &mut train_source,
        &mut valid_source,
        &mut sinks,
        &mut ema,
        &cfg.loop_config(),
    )?;
    log::info!(
        "[train] done: {} iterations, {} validations, checkpoint written {} times to {}",
        report.iterations,
        report.validations,
        report.checkpoint_writes,
        cfg.checkpoint_dir().display()
    );
    Ok(report)
}

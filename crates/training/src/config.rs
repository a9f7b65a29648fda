//! Training configuration: defaults, an optional TOML file, then CLI flags.

use crate::loss::METRIC_NAMES;
use crate::runner::LoopConfig;
use data_contracts::Split;
use models::UNetConfig;
use seg_dataset::FeederConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid training config: {0}")]
    Invalid(String),
}

/// Offset between the train and valid feeder seeds.
const VALID_SEED_OFFSET: u64 = 1_000_003;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub iterations: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub data_root: PathBuf,
    pub output_dir: PathBuf,
    pub validate_every: usize,
    pub status_metrics: Vec<usize>,
    pub ema_decay: f32,
    pub seed: Option<u64>,
    pub feeder_threads: usize,
    pub queue_capacity: usize,
    pub base_filters: usize,
    pub depth: usize,
    pub resume: bool,
    pub metrics_out: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let unet = UNetConfig::default();
        Self {
            iterations: 1000,
            batch_size: 2,
            learning_rate: 1e-4,
            data_root: PathBuf::from("data"),
            output_dir: PathBuf::from("runs/unet"),
            validate_every: 10,
            status_metrics: vec![0, 2, 3, 4, 5],
            ema_decay: 0.99,
            seed: None,
            feeder_threads: 2,
            queue_capacity: 8,
            base_filters: unet.base_filters,
            depth: unet.depth,
            resume: false,
            metrics_out: None,
        }
    }
}

/// Every key is optional; missing keys keep the current value.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrainConfigFile {
    pub iterations: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
    pub data_root: Option<String>,
    pub output_dir: Option<String>,
    pub validate_every: Option<usize>,
    pub status_metrics: Option<Vec<usize>>,
    pub ema_decay: Option<f32>,
    pub seed: Option<u64>,
    pub feeder_threads: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub model: Option<ModelSection>,
    pub resume: Option<bool>,
    pub metrics_out: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    pub base_filters: Option<usize>,
    pub depth: Option<usize>,
}

impl TrainConfigFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl TrainConfig {
    /// Overlay the keys present in `file`; paths get `~` and `${VAR}` expansion.
    pub fn apply_file(&mut self, file: TrainConfigFile) {
        if let Some(v) = file.iterations {
            self.iterations = v;
        }
        if let Some(v) = file.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = file.learning_rate {
            self.learning_rate = v;
        }
        if let Some(v) = file.data_root {
            self.data_root = expand_path(&v);
        }
        if let Some(v) = file.output_dir {
            self.output_dir = expand_path(&v);
        }
        if let Some(v) = file.validate_every {
            self.validate_every = v;
        }
        if let Some(v) = file.status_metrics {
            self.status_metrics = v;
        }
        if let Some(v) = file.ema_decay {
            self.ema_decay = v;
        }
        if file.seed.is_some() {
            self.seed = file.seed;
        }
        if let Some(v) = file.feeder_threads {
            self.feeder_threads = v;
        }
        if let Some(v) = file.queue_capacity {
            self.queue_capacity = v;
        }
        if let Some(model) = file.model {
            if let Some(v) = model.base_filters {
                self.base_filters = v;
            }
            if let Some(v) = model.depth {
                self.depth = v;
            }
        }
        if let Some(v) = file.resume {
            self.resume = v;
        }
        if let Some(v) = file.metrics_out {
            self.metrics_out = Some(expand_path(&v));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.batch_size == 0 {
            return invalid("batch_size must be > 0".into());
        }
        if self.validate_every == 0 {
            return invalid("validate_every must be > 0".into());
        }
        if self.feeder_threads == 0 {
            return invalid("feeder_threads must be > 0".into());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be > 0".into());
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.ema_decay) {
            return invalid(format!("ema_decay must be in [0, 1), got {}", self.ema_decay));
        }
        if let Some(bad) = self
            .status_metrics
            .iter()
            .find(|&&i| i >= METRIC_NAMES.len())
        {
            return invalid(format!(
                "status metric index {bad} out of range 0..={}",
                METRIC_NAMES.len() - 1
            ));
        }
        self.unet_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn unet_config(&self) -> UNetConfig {
        UNetConfig {
            base_filters: self.base_filters,
            depth: self.depth,
            ..Default::default()
        }
    }

    pub fn log_dir(&self, split: Split) -> PathBuf {
        self.output_dir.join(split.as_str())
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output_dir.join("checkpoint")
    }

    pub fn feeder_config(&self, split: Split) -> FeederConfig {
        let seed = match split {
            Split::Train => self.seed,
            Split::Valid => self.seed.map(|s| s.wrapping_add(VALID_SEED_OFFSET)),
        };
        FeederConfig {
            batch_size: self.batch_size,
            num_threads: self.feeder_threads,
            capacity: self.queue_capacity,
            seed,
            ..Default::default()
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            iterations: self.iterations,
            validate_every: self.validate_every,
            status_metrics: self.status_metrics.clone(),
            checkpoint_dir: self.checkpoint_dir(),
        }
    }
}

pub fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

/// Replace `${VAR}` with its value; unknown variables are left as written.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let cfg = TrainConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.checkpoint_dir(), PathBuf::from("runs/unet/checkpoint"));
        assert_eq!(cfg.log_dir(Split::Valid), PathBuf::from("runs/unet/valid"));
    }

    #[test]
    fn zero_iterations_is_accepted() {
        let cfg = TrainConfig {
            iterations: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[rstest]
    #[case::batch_size(TrainConfig { batch_size: 0, ..Default::default() })]
    #[case::validate_every(TrainConfig { validate_every: 0, ..Default::default() })]
    #[case::threads(TrainConfig { feeder_threads: 0, ..Default::default() })]
    #[case::capacity(TrainConfig { queue_capacity: 0, ..Default::default() })]
    #[case::negative_lr(TrainConfig { learning_rate: -1e-3, ..Default::default() })]
    #[case::nan_lr(TrainConfig { learning_rate: f64::NAN, ..Default::default() })]
    #[case::status_index(TrainConfig { status_metrics: vec![0, 6], ..Default::default() })]
    #[case::ema_decay(TrainConfig { ema_decay: 1.0, ..Default::default() })]
    #[case::depth(TrainConfig { depth: 0, ..Default::default() })]
    fn invalid_configs_are_rejected(#[case] cfg: TrainConfig) {
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn file_overrides_only_present_keys() {
        let file: TrainConfigFile = toml::from_str(
            r#"
            iterations = 50
            learning_rate = 0.001
            status_metrics = [0, 1]

            [model]
            depth = 2
            "#,
        )
        .unwrap();
        let mut cfg = TrainConfig::default();
        cfg.apply_file(file);
        assert_eq!(cfg.iterations, 50);
        assert_eq!(cfg.learning_rate, 0.001);
        assert_eq!(cfg.status_metrics, vec![0, 1]);
        assert_eq!(cfg.depth, 2);
        assert_eq!(cfg.batch_size, 2);
        assert_eq!(cfg.base_filters, 16);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<TrainConfigFile>("iters = 3").is_err());
    }

    #[test]
    fn env_vars_expand_in_paths() {
        std::env::set_var("SEGTRAIN_TEST_ROOT", "/data/brats");
        assert_eq!(
            expand_path("${SEGTRAIN_TEST_ROOT}/npy"),
            PathBuf::from("/data/brats/npy")
        );
        assert_eq!(
            expand_path("${SEGTRAIN_TEST_UNSET_VAR}/x"),
            PathBuf::from("${SEGTRAIN_TEST_UNSET_VAR}/x")
        );
        assert_eq!(expand_path("plain/${open"), PathBuf::from("plain/${open"));
    }

    #[test]
    fn valid_feeder_gets_a_distinct_seed() {
        let cfg = TrainConfig {
            seed: Some(5),
            ..Default::default()
        };
        assert_eq!(cfg.feeder_config(Split::Train).seed, Some(5));
        assert_ne!(cfg.feeder_config(Split::Valid).seed, Some(5));
        assert_eq!(cfg.feeder_config(Split::Valid).batch_size, 2);
    }
}

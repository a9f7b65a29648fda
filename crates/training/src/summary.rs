//! Per-step summaries and the sinks that persist them.
//!
//! A [`Summary`] is produced by every train or eval step. Sinks receive it
//! together with the split and the global step:
//! - [`TensorBoardSink`]: event files under `<output_dir>/train` and `<output_dir>/valid`.
//! - [`JsonlSink`]: one JSON object per line, for scripts and dashboards.

use anyhow::Context;
use data_contracts::Split;
use serde_json::{json, Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tensorboard_rs::summary_writer::SummaryWriter;

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub num: f64,
    pub sum: f64,
    pub sum_squares: f64,
    /// Right edge of each bucket.
    pub bucket_limits: Vec<f64>,
    pub bucket_counts: Vec<f64>,
}

impl Histogram {
    /// `None` when `values` holds no finite number.
    pub fn from_values(values: &[f32], buckets: usize) -> Option<Self> {
        let finite: Vec<f64> = values
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| f64::from(v))
            .collect();
        if finite.is_empty() {
            return None;
        }
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let sum = finite.iter().sum();
        let sum_squares = finite.iter().map(|v| v * v).sum();
        let num = finite.len() as f64;

        let buckets = buckets.max(1);
        let (bucket_limits, bucket_counts) = if max > min {
            let width = (max - min) / buckets as f64;
            let mut limits: Vec<f64> = (1..=buckets).map(|i| min + width * i as f64).collect();
            if let Some(last) = limits.last_mut() {
                *last = max;
            }
            let mut counts = vec![0.0; buckets];
            for v in &finite {
                let idx = (((v - min) / width) as usize).min(buckets - 1);
                counts[idx] += 1.0;
            }
            (limits, counts)
        } else {
            (vec![max], vec![num])
        };

        Some(Self {
            min,
            max,
            num,
            sum,
            sum_squares,
            bucket_limits,
            bucket_counts,
        })
    }

    pub fn mean(&self) -> f64 {
        if self.num > 0.0 {
            self.sum / self.num
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub scalars: Vec<(String, f32)>,
    pub histograms: Vec<(String, Histogram)>,
}

impl Summary {
    pub fn push_scalar(&mut self, tag: impl Into<String>, value: f32) {
        self.scalars.push((tag.into(), value));
    }

    pub fn push_histogram(&mut self, tag: impl Into<String>, histogram: Histogram) {
        self.histograms.push((tag.into(), histogram));
    }

    pub fn scalar(&self, tag: &str) -> Option<f32> {
        self.scalars
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, v)| *v)
    }
}

pub trait SummarySink {
    fn write(&mut self, split: Split, summary: &Summary, step: u64) -> anyhow::Result<()>;
    fn flush(&mut self) -> anyhow::Result<()>;
}

pub struct TensorBoardSink {
    train: SummaryWriter,
    valid: SummaryWriter,
}

impl TensorBoardSink {
    /// Event files for each split go to their own directory.
    pub fn new(train_dir: &Path, valid_dir: &Path) -> anyhow::Result<Self> {
        let open = |dir: &Path| -> anyhow::Result<SummaryWriter> {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating summary dir {}", dir.display()))?;
            Ok(SummaryWriter::new(dir))
        };
        Ok(Self {
            train: open(train_dir)?,
            valid: open(valid_dir)?,
        })
    }

    fn writer(&mut self, split: Split) -> &mut SummaryWriter {
        match split {
            Split::Train => &mut self.train,
            Split::Valid => &mut self.valid,
        }
    }
}

impl SummarySink for TensorBoardSink {
    fn write(&mut self, split: Split, summary: &Summary, step: u64) -> anyhow::Result<()> {
        let step = step as usize;
        let writer = self.writer(split);
        for (tag, value) in &summary.scalars {
            writer.add_scalar(tag, *value, step);
        }
        for (tag, h) in &summary.histograms {
            writer.add_histogram_raw(
                tag,
                h.min,
                h.max,
                h.num,
                h.sum,
                h.sum_squares,
                &h.bucket_limits,
                &h.bucket_counts,
                step,
            );
        }
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.train.flush();
        self.valid.flush();
        Ok(())
    }
}

/// Appends `{"split", "step", "scalars", "histograms"}` lines to a file.
pub struct JsonlSink {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonlSink {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating metrics dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening metrics file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }
}

impl SummarySink for JsonlSink {
    fn write(&mut self, split: Split, summary: &Summary, step: u64) -> anyhow::Result<()> {
        let mut scalars = Map::new();
        for (tag, value) in &summary.scalars {
            scalars.insert(tag.clone(), json!(value));
        }
        let mut histograms = Map::new();
        for (tag, h) in &summary.histograms {
            histograms.insert(
                tag.clone(),
                json!({ "min": h.min, "max": h.max, "mean": h.mean(), "num": h.num }),
            );
        }
        let line = json!({
            "split": split,
            "step": step,
            "scalars": Value::Object(scalars),
            "histograms": Value::Object(histograms),
        });
        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.out
            .flush()
            .with_context(|| format!("flushing {}", self.path.display()))
    }
}

/// Fans every write out to a list of sinks.
#[derive(Default)]
pub struct SummarySinks {
    sinks: Vec<Box<dyn SummarySink>>,
}

impl SummarySinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: impl SummarySink + 'static) {
        self.sinks.push(Box::new(sink));
    }
}

impl SummarySink for SummarySinks {
    fn write(&mut self, split: Split, summary: &Summary, step: u64) -> anyhow::Result<()> {
        for sink in &mut self.sinks {
            sink.write(split, summary, step)?;
        }
        Ok(())
    }

    /// Flushes every sink and reports the first failure.
    fn flush(&mut self) -> anyhow::Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                log::warn!("[summary] flush failed: {e:#}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn histogram_counts_every_value() {
        let h = Histogram::from_values(&[0.0, 0.25, 0.5, 0.75, 1.0], 4).unwrap();
        assert_eq!(h.num, 5.0);
        assert_eq!(h.bucket_limits.len(), 4);
        assert_eq!(h.bucket_counts.iter().sum::<f64>(), 5.0);
        assert_eq!(*h.bucket_limits.last().unwrap(), 1.0);
        // max lands in the last bucket
        assert_eq!(h.bucket_counts[3], 2.0);
        assert_relative_eq!(h.mean(), 0.5);
        assert_relative_eq!(h.sum_squares, 0.0625 + 0.25 + 0.5625 + 1.0);
    }

    #[test]
    fn constant_values_use_a_single_bucket() {
        let h = Histogram::from_values(&[2.0; 3], 10).unwrap();
        assert_eq!(h.bucket_limits, vec![2.0]);
        assert_eq!(h.bucket_counts, vec![3.0]);
    }

    #[test]
    fn non_finite_values_are_skipped() {
        assert!(Histogram::from_values(&[f32::NAN], 4).is_none());
        let h = Histogram::from_values(&[f32::INFINITY, 1.0], 4).unwrap();
        assert_eq!(h.num, 1.0);
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/metrics.jsonl");
        let mut sink = JsonlSink::open(&path).unwrap();
        let mut summary = Summary::default();
        summary.push_scalar("dice", 0.5);
        sink.write(Split::Train, &summary, 1).unwrap();
        sink.write(Split::Valid, &summary, 1).unwrap();
        sink.flush().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["split"], "train");
        assert_eq!(lines[1]["split"], "valid");
        assert_eq!(lines[1]["step"], 1);
        assert_eq!(lines[0]["scalars"]["dice"], 0.5);
    }

    #[test]
    fn tensorboard_sink_creates_split_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink =
            TensorBoardSink::new(&dir.path().join("train"), &dir.path().join("valid")).unwrap();
        let mut summary = Summary::default();
        summary.push_scalar("dice", 0.1);
        summary.push_histogram("probs", Histogram::from_values(&[0.1, 0.9], 2).unwrap());
        sink.write(Split::Train, &summary, 0).unwrap();
        sink.flush().unwrap();
        assert!(dir.path().join("train").is_dir());
        assert!(dir.path().join("valid").is_dir());
    }
}

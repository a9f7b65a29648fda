//! Exponential moving averages of step metrics, keyed by split and metric name.

use crate::loss::METRIC_NAMES;
use data_contracts::Split;
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq)]
struct EmaEntry {
    value: f32,
    updates: u64,
}

#[derive(Debug, Clone)]
pub struct EmaTracker {
    decay: f32,
    entries: BTreeMap<(Split, String), EmaEntry>,
}

impl Default for EmaTracker {
    fn default() -> Self {
        Self::new(0.99)
    }
}

impl EmaTracker {
    pub fn new(decay: f32) -> Self {
        Self {
            decay: decay.clamp(0.0, 1.0),
            entries: BTreeMap::new(),
        }
    }

    /// The first observation of a metric seeds its average.
    pub fn update(&mut self, split: Split, metrics: &[(&str, f32)]) {
        for &(name, value) in metrics {
            let decay = self.decay;
            self.entries
                .entry((split, name.to_string()))
                .and_modify(|e| {
                    e.value = decay * e.value + (1.0 - decay) * value;
                    e.updates += 1;
                })
                .or_insert(EmaEntry { value, updates: 1 });
        }
    }

    pub fn get(&self, split: Split, name: &str) -> Option<f32> {
        self.entries
            .get(&(split, name.to_string()))
            .map(|e| e.value)
    }

    /// How many observations have been folded into `(split, name)`.
    pub fn updates(&self, split: Split, name: &str) -> u64 {
        self.entries
            .get(&(split, name.to_string()))
            .map(|e| e.updates)
            .unwrap_or(0)
    }

    pub fn snapshot(&self, split: Split) -> Vec<(String, f32)> {
        self.entries
            .iter()
            .filter(|((s, _), _)| *s == split)
            .map(|((_, name), e)| (name.clone(), e.value))
            .collect()
    }

    /// `iter 12 train [dice=0.8123 dice_1=0.5011] valid [dice=0.7902 dice_1=0.4410]`
    ///
    /// `indices` select from [`METRIC_NAMES`]; a split with no observations yet is omitted.
    pub fn status_line(&self, iteration: usize, indices: &[usize]) -> String {
        let mut line = format!("iter {iteration}");
        for split in Split::ALL {
            let mut parts = Vec::with_capacity(indices.len());
            for &idx in indices {
                let Some(name) = METRIC_NAMES.get(idx) else {
                    continue;
                };
                if let Some(value) = self.get(split, name) {
                    parts.push(format!("{name}={value:.4}"));
                }
            }
            if !parts.is_empty() {
                let _ = write!(line, " {split} [{}]", parts.join(" "));
            }
        }
        line
    }
}

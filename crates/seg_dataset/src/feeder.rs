//! Background batch feeding: a worker pool fills a bounded queue that the
//! training loop drains with blocking fetches.

use crate::arrays::SplitArrays;
use crate::types::{DatasetResult, SegDatasetError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use data_contracts::{HostBatch, Split};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Something the training loop can pull batches from.
pub trait BatchSource {
    /// Blocks until a batch is available.
    fn next_batch(&mut self) -> DatasetResult<HostBatch>;
    /// Stops producers and waits for them; safe to call more than once.
    fn shutdown(&mut self);
}

/// Shared cancellation flag checked at every blocking send/receive.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct FeederConfig {
    pub batch_size: usize,
    /// Worker threads assembling batches.
    pub num_threads: usize,
    /// Queue capacity in batches.
    pub capacity: usize,
    /// Base seed; worker `i` uses `seed + i`. Random when unset.
    pub seed: Option<u64>,
    /// Granularity at which blocked sends/receives re-check the stop token.
    pub poll_interval: Duration,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            num_threads: 2,
            capacity: 8,
            seed: None,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl FeederConfig {
    pub fn validate(&self) -> DatasetResult<()> {
        if self.batch_size == 0 {
            return Err(SegDatasetError::Config("batch_size must be > 0".into()));
        }
        if self.num_threads == 0 {
            return Err(SegDatasetError::Config("num_threads must be > 0".into()));
        }
        if self.capacity == 0 {
            return Err(SegDatasetError::Config("capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Walks shuffled epochs of sample indices, reshuffling at every epoch boundary.
pub(crate) struct EpochSampler {
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl EpochSampler {
    pub(crate) fn new(len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rng);
        Self {
            order,
            cursor: 0,
            rng,
        }
    }

    pub(crate) fn next_indices(&mut self, count: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(count);
        if self.order.is_empty() {
            return out;
        }
        while out.len() < count {
            if self.cursor == self.order.len() {
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
            }
            out.push(self.order[self.cursor]);
            self.cursor += 1;
        }
        out
    }
}

pub struct BatchFeeder {
    split: Split,
    spatial: (usize, usize),
    rx: Option<Receiver<HostBatch>>,
    workers: Vec<JoinHandle<()>>,
    stop: StopToken,
    poll_interval: Duration,
}

impl BatchFeeder {
    pub fn spawn(arrays: Arc<SplitArrays>, cfg: FeederConfig) -> DatasetResult<Self> {
        cfg.validate()?;
        let split = arrays.split();
        let spatial = arrays.spatial();
        let (tx, rx) = bounded(cfg.capacity);
        let stop = StopToken::new();
        let base_seed = cfg.seed.unwrap_or_else(rand::random);
        let mut workers = Vec::with_capacity(cfg.num_threads);
        for worker in 0..cfg.num_threads {
            let tx = tx.clone();
            let arrays = Arc::clone(&arrays);
            let worker_stop = stop.clone();
            let batch_size = cfg.batch_size;
            let poll = cfg.poll_interval;
            let seed = base_seed.wrapping_add(worker as u64);
            let handle = thread::Builder::new()
                .name(format!("feeder-{split}-{worker}"))
                .spawn(move || feed_worker(&arrays, &tx, &worker_stop, batch_size, seed, poll))
                .map_err(SegDatasetError::Spawn);
            match handle {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    stop.stop();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }
        log::debug!(
            "[feeder] {split}: {} workers, batch_size={}, capacity={}, seed={base_seed}",
            cfg.num_threads,
            cfg.batch_size,
            cfg.capacity
        );
        Ok(Self {
            split,
            spatial,
            rx: Some(rx),
            workers,
            stop,
            poll_interval: cfg.poll_interval,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    /// `(height, width)` of every batch this feeder produces.
    pub fn spatial(&self) -> (usize, usize) {
        self.spatial
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.rx.is_some()
    }
}

fn feed_worker(
    arrays: &SplitArrays,
    tx: &Sender<HostBatch>,
    stop: &StopToken,
    batch_size: usize,
    seed: u64,
    poll: Duration,
) {
    let mut sampler = EpochSampler::new(arrays.len(), seed);
    while !stop.is_stopped() {
        let indices = sampler.next_indices(batch_size);
        let mut batch = match arrays.assemble(&indices) {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("[feeder] {} assemble error: {e}", arrays.split());
                return;
            }
        };
        loop {
            match tx.send_timeout(batch, poll) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if stop.is_stopped() {
                        return;
                    }
                    batch = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

impl BatchSource for BatchFeeder {
    fn next_batch(&mut self) -> DatasetResult<HostBatch> {
        let split = self.split;
        let rx = self
            .rx
            .as_ref()
            .ok_or(SegDatasetError::Stopped { split })?;
        loop {
            if self.stop.is_stopped() {
                return Err(SegDatasetError::Stopped { split });
            }
            match rx.recv_timeout(self.poll_interval) {
                Ok(batch) => return Ok(batch),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SegDatasetError::Disconnected { split })
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.stop.stop();
        // Dropping the receiver unblocks producers parked on a full queue.
        self.rx.take();
        let joined = self.workers.len();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("[feeder] {} worker panicked", self.split);
            }
        }
        if joined > 0 {
            log::debug!("[feeder] {}: joined {joined} workers", self.split);
        }
    }
}

impl Drop for BatchFeeder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

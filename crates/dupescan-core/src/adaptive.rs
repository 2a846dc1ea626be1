use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sysinfo::System;
use tracing::{debug, info, warn};

pub const MIN_BATCH_FLOOR: usize = 100;
pub const MAX_BATCH_CAP: usize = 10_000;
const HIGH_WATERMARK: f64 = 0.8;
const LOW_WATERMARK: f64 = 0.4;

/// Shared, atomically tunable sizing knobs. The write serializer reads
/// `max_batch` before each flush decision; phase dispatch reads `workers`
/// when a pool is brought up. In-flight work is never interrupted by a
/// sizing change.
#[derive(Debug)]
pub struct AdaptiveSizing {
    max_batch: AtomicUsize,
    workers: AtomicUsize,
    mem_ceiling_bytes: u64,
}

impl AdaptiveSizing {
    pub fn new(max_batch: usize, workers: usize, mem_ceiling_bytes: u64) -> Self {
        Self {
            max_batch: AtomicUsize::new(max_batch.clamp(MIN_BATCH_FLOOR, MAX_BATCH_CAP)),
            workers: AtomicUsize::new(workers.max(1)),
            mem_ceiling_bytes,
        }
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    fn worker_cap() -> usize {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        cpus * 2
    }

    /// React to one memory observation (resident bytes of this process).
    fn observe(&self, resident: u64) {
        let ceiling = self.mem_ceiling_bytes as f64;
        let usage = resident as f64;

        if usage > ceiling * HIGH_WATERMARK {
            let batch = self.max_batch();
            let new_batch = (batch / 2).max(MIN_BATCH_FLOOR);
            let workers = self.workers();
            let new_workers = workers.saturating_sub(1).max(1);
            if new_batch != batch || new_workers != workers {
                info!(
                    resident,
                    old_batch = batch,
                    new_batch,
                    old_workers = workers,
                    new_workers,
                    "memory pressure high, shrinking batch and worker targets"
                );
                self.max_batch.store(new_batch, Ordering::Relaxed);
                self.workers.store(new_workers, Ordering::Relaxed);
            }
        } else if usage < ceiling * LOW_WATERMARK {
            let batch = self.max_batch();
            let new_batch = (batch * 3 / 2).min(MAX_BATCH_CAP);
            let workers = self.workers();
            let new_workers = (workers + 1).min(Self::worker_cap());
            if new_batch != batch || new_workers != workers {
                debug!(
                    resident,
                    new_batch, new_workers,
                    "memory headroom available, growing batch and worker targets"
                );
                self.max_batch.store(new_batch, Ordering::Relaxed);
                self.workers.store(new_workers, Ordering::Relaxed);
            }
        }
    }
}

/// Background monitor sampling this process's resident memory on a fixed
/// interval and nudging the sizing knobs.
pub struct SizingMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn spawn_monitor(sizing: Arc<AdaptiveSizing>, interval: Duration) -> SizingMonitor {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                warn!(error = %e, "cannot resolve current pid, adaptive sizing disabled");
                return;
            }
        };
        let mut sys = System::new();
        while !stop_flag.load(Ordering::Relaxed) {
            // Sleep in short slices so shutdown is prompt.
            let mut slept = Duration::ZERO;
            while slept < interval && !stop_flag.load(Ordering::Relaxed) {
                let slice = Duration::from_millis(250).min(interval - slept);
                thread::sleep(slice);
                slept += slice;
            }
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            sys.refresh_process(pid);
            if let Some(process) = sys.process(pid) {
                sizing.observe(process.memory());
            }
        }
    });
    SizingMonitor {
        stop,
        handle: Some(handle),
    }
}

impl SizingMonitor {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SizingMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

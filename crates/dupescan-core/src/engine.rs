use chrono::Local;
use crossbeam_channel::bounded;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::adaptive::{self, AdaptiveSizing};
use crate::config::ScanConfig;
use crate::dupes::{self, MaterializeOptions};
use crate::error::Error;
use crate::hashing;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::scanner::{self, TraversalParams, CHANNEL_CAPACITY};
use crate::storage::{Database, Profile};
use crate::writer::{self, WriterMsg};

/// Resident-memory ceiling steered against by adaptive sizing.
const MEM_CEILING_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const SIZING_INTERVAL: Duration = Duration::from_secs(30);
/// Writer-side row cap before adaptive adjustment.
const INITIAL_MAX_BATCH: usize = 10_000;

/// Pipeline lifecycle. Any state can transition to `Aborted` on a fatal
/// error (schema init, unrecoverable store failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Phase1,
    Phase1Drain,
    Phase2,
    Materialize,
    Done,
    Aborted,
}

pub struct IndexEngine {
    config: ScanConfig,
    db_path_override: Option<PathBuf>,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct IndexResult {
    pub db_path: PathBuf,
    pub total_files: u64,
    pub rows_written: u64,
    pub hashed_files: usize,
    pub failed_hashes: usize,
    pub duplicate_groups: i64,
    pub wasted_bytes: i64,
    pub scan_duration: Duration,
    pub hash_duration: Duration,
    pub total_duration: Duration,
}

impl IndexEngine {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            db_path_override: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pin the store path instead of deriving `scan_<timestamp>.db` under
    /// the configured output directory.
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.db_path_override = Some(path);
        self
    }

    /// Shared cancellation token; setting it stops traversal at the next
    /// frame boundary, hashing at the next chunk, and materialization at
    /// the next batch.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<IndexResult, Error> {
        match self.run_pipeline(reporter) {
            Ok(result) => Ok(result),
            Err(Error::Cancelled) => {
                info!("pipeline cancelled");
                Err(Error::Cancelled)
            }
            Err(e) => {
                error!(state = ?PipelineState::Aborted, error = %e, "pipeline aborted");
                Err(e)
            }
        }
    }

    fn run_pipeline(&self, reporter: &dyn ProgressReporter) -> Result<IndexResult, Error> {
        let started = Instant::now();
        let db_path = self.store_path();
        debug!(state = ?PipelineState::Init, db = %db_path.display(), "pipeline starting");

        // Schema initialization failure is fatal; no partial run.
        let writer_db = Database::create(&db_path)?;

        let sizing = Arc::new(AdaptiveSizing::new(
            INITIAL_MAX_BATCH,
            self.config.max_workers,
            MEM_CEILING_BYTES,
        ));
        let monitor = adaptive::spawn_monitor(Arc::clone(&sizing), SIZING_INTERVAL);
        let retry = RetryPolicy::default();

        // ── Phase 1: traversal feeding the single write serializer ──
        debug!(state = ?PipelineState::Phase1, roots = self.config.roots.len(), "traversal starting");
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let writer_handle = {
            let sizing = Arc::clone(&sizing);
            let retry = retry.clone();
            thread::spawn(move || writer::run(writer_db, rx, sizing, retry))
        };

        reporter.on_scan_start();
        let scan_started = Instant::now();
        let files_found = AtomicU64::new(0);
        let params = TraversalParams {
            exclude: self.config.exclude_dirs.clone(),
            batch_size: self.config.batch_size,
            top_folder_depth: self.config.top_folder_depth,
        };

        let lanes = self.config.max_workers.min(self.config.roots.len()).max(1);
        let total_files: u64 = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(lanes);
            for lane in 0..lanes {
                let tx = tx.clone();
                let params = &params;
                let files_found = &files_found;
                let cancel = &*self.cancel;
                let roots = &self.config.roots;
                handles.push(scope.spawn(move || {
                    let mut lane_total = 0u64;
                    // Roots are distributed round-robin across lanes.
                    for spec in roots.iter().skip(lane).step_by(lanes) {
                        let root_started = Instant::now();
                        match scanner::scan_root(
                            &spec.path,
                            &spec.tag,
                            &tx,
                            params,
                            cancel,
                            files_found,
                            reporter,
                        ) {
                            Ok(count) => {
                                info!(
                                    root = %spec.path,
                                    tag = %spec.tag,
                                    files = count,
                                    duration_ms = root_started.elapsed().as_millis() as u64,
                                    "root scan completed"
                                );
                                lane_total += count;
                            }
                            Err(e) => {
                                error!(root = %spec.path, error = %e, "root scan failed");
                            }
                        }
                    }
                    lane_total
                }));
            }
            handles.into_iter().map(|h| h.join().unwrap_or(0)).sum()
        });

        // ── Phase 1 drain: flush remaining buffer, stop the writer ──
        debug!(state = ?PipelineState::Phase1Drain, "draining write serializer");
        let _ = tx.send(WriterMsg::Shutdown);
        drop(tx);
        let rows_written = writer_handle
            .join()
            .map_err(|_| Error::Other("write serializer panicked".to_string()))?;
        let scan_duration = scan_started.elapsed();
        reporter.on_scan_complete(total_files, scan_duration.as_secs_f64());
        info!(total_files, rows_written, "phase 1 complete");

        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        // ── Phase 2: hash size-collision candidates ──
        debug!(state = ?PipelineState::Phase2, "hashing phase starting");
        let db = Database::open(&db_path, Profile::Hash)?;
        let hash_started = Instant::now();
        let hash_stats = hashing::run(&db, sizing.workers(), &self.cancel, &retry, reporter)?;
        let hash_duration = hash_started.elapsed();
        reporter.on_hash_complete(hash_stats.hashed, hash_duration.as_secs_f64());

        // ── Materialize duplicate groups ──
        debug!(state = ?PipelineState::Materialize, "materializing duplicate groups");
        reporter.on_materialize_start();
        let materialize_started = Instant::now();
        let materialize_opts = MaterializeOptions {
            note: format!("indexer run for {}", db_path.display()),
            ..MaterializeOptions::default()
        };
        let groups = dupes::materialize(&db, &materialize_opts, &self.cancel, &retry)?;
        reporter
            .on_materialize_complete(groups.groups as u64, materialize_started.elapsed().as_secs_f64());

        monitor.stop();
        let summary = db.summary()?;
        let total_duration = started.elapsed();
        debug!(state = ?PipelineState::Done, "pipeline complete");
        info!(
            total_files,
            duplicate_groups = summary.duplicate_groups,
            wasted_bytes = summary.wasted_bytes,
            duration_secs = format!("{:.2}", total_duration.as_secs_f64()),
            "indexing run complete"
        );

        Ok(IndexResult {
            db_path,
            total_files,
            rows_written,
            hashed_files: hash_stats.hashed,
            failed_hashes: hash_stats.failed,
            duplicate_groups: summary.duplicate_groups,
            wasted_bytes: summary.wasted_bytes,
            scan_duration,
            hash_duration,
            total_duration,
        })
    }

    fn store_path(&self) -> PathBuf {
        match &self.db_path_override {
            Some(path) => path.clone(),
            None => {
                let name = format!("scan_{}.db", Local::now().format("%Y%m%d_%H%M%S"));
                self.config.output_dir.join(name)
            }
        }
    }
}

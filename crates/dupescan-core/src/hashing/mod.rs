pub mod digest;

use crossbeam_channel::bounded;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::storage::models::HashJob;
use crate::storage::Database;

/// Per-attempt hashing deadline; exhaustion counts as a hash failure.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
/// Digest updates committed per transaction.
const COMMIT_BATCH: usize = 1_000;
/// Progress log cadence, in processed files.
const PROGRESS_EVERY: usize = 1_000;

/// One worker's verdict on one file.
struct HashOutcome {
    id: i64,
    digest: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Default)]
pub struct HashStats {
    pub candidates: usize,
    pub hashed: usize,
    pub failed: usize,
}

/// Phase 2: select size-collision candidates, fan them out to a worker
/// pool, and stream digests back into the store in medium-sized
/// transactions.
pub fn run(
    db: &Database,
    workers: usize,
    cancel: &AtomicBool,
    retry: &RetryPolicy,
    reporter: &dyn ProgressReporter,
) -> Result<HashStats, Error> {
    let candidates = db.candidate_files()?;
    let total = candidates.len();
    if total == 0 {
        info!("no size-collision candidates, hashing phase skipped");
        return Ok(HashStats::default());
    }
    info!(candidates = total, workers, "hashing potential duplicates");
    reporter.on_hash_start(total);

    let workers = workers.max(1);
    let mut stats = HashStats {
        candidates: total,
        ..HashStats::default()
    };

    thread::scope(|scope| -> Result<(), Error> {
        let (job_tx, job_rx) = bounded::<HashJob>(workers * 2);
        let (result_tx, result_rx) = bounded::<HashOutcome>(workers * 2);

        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for job in job_rx.iter() {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    // None means the attempt was cancelled mid-read; the
                    // file keeps its null digest and the worker exits.
                    match hash_one(&job, cancel, retry) {
                        Some(outcome) => {
                            if result_tx.send(outcome).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        scope.spawn(move || {
            for job in candidates {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        // Result consumer: the only Phase-2 writer.
        let started = Instant::now();
        let mut batch: Vec<(i64, String)> = Vec::with_capacity(COMMIT_BATCH);
        let mut processed = 0usize;
        for outcome in result_rx.iter() {
            processed += 1;
            match outcome {
                HashOutcome {
                    id,
                    digest: Some(digest),
                    ..
                } => batch.push((id, digest)),
                HashOutcome {
                    id,
                    error: Some(error),
                    ..
                } => {
                    stats.failed += 1;
                    warn!(id, error = %error, "hash computation failed, digest left null");
                }
                // Shrunk to zero bytes between phases: digest stays null.
                HashOutcome { .. } => {}
            }
            if batch.len() >= COMMIT_BATCH {
                stats.hashed += commit_digests(db, retry, &mut batch);
            }
            if processed % PROGRESS_EVERY == 0 {
                log_progress(processed, total, stats.failed, started);
                reporter.on_hash_progress(processed, total);
            }
        }
        stats.hashed += commit_digests(db, retry, &mut batch);
        log_progress(processed, total, stats.failed, started);
        Ok(())
    })?;

    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Cancelled);
    }
    Ok(stats)
}

fn hash_one(job: &HashJob, cancel: &AtomicBool, retry: &RetryPolicy) -> Option<HashOutcome> {
    let result = retry.execute_where(
        "hash_file",
        // Cancellation surfaces as Interrupted; never retry it.
        |e: &io::Error| e.kind() != io::ErrorKind::Interrupted,
        || {
            let deadline = Instant::now() + ATTEMPT_TIMEOUT;
            digest::hash_file(Path::new(&job.path), cancel, deadline)
        },
    );
    match result {
        Ok(digest) => Some(HashOutcome {
            id: job.id,
            digest,
            error: None,
        }),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
        Err(e) => Some(HashOutcome {
            id: job.id,
            digest: None,
            error: Some(e.to_string()),
        }),
    }
}

fn commit_digests(db: &Database, retry: &RetryPolicy, batch: &mut Vec<(i64, String)>) -> usize {
    if batch.is_empty() {
        return 0;
    }
    let written = match retry.execute("digest_update", || db.apply_digests(batch)) {
        Ok(n) => n,
        Err(e) => {
            warn!(count = batch.len(), error = %e, "digest batch dropped after retries");
            0
        }
    };
    batch.clear();
    written
}

fn log_progress(processed: usize, total: usize, failed: usize, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
    let throughput = processed as f64 / elapsed;
    let success_rate = if processed > 0 {
        (processed - failed) as f64 / processed as f64 * 100.0
    } else {
        100.0
    };
    let remaining = total.saturating_sub(processed);
    let eta_secs = if throughput > 0.0 {
        remaining as f64 / throughput
    } else {
        0.0
    };
    info!(
        processed,
        total,
        files_per_sec = format!("{throughput:.1}"),
        success_rate = format!("{success_rate:.1}%"),
        eta_secs = format!("{eta_secs:.0}"),
        "hashing progress"
    );
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{info, warn};

use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::storage::queries::RunCounters;
use crate::storage::Database;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    /// Clear prior `is_duplicate` marks and materialized groups first.
    pub reset: bool,
    /// Only process groups with `digest > resume_after` (resume boundary).
    pub resume_after: Option<String>,
    /// Duplicate groups per commit batch.
    pub batch_size: usize,
    /// Log progress every N processed groups; 0 disables.
    pub progress_every: usize,
    /// Free-form annotation stored on the run row.
    pub note: String,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            reset: true,
            resume_after: None,
            batch_size: 500,
            progress_every: 2_000,
            note: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaterializeSummary {
    pub run_id: i64,
    pub groups: i64,
    pub files: i64,
    pub bytes: i64,
}

/// Convert raw digests into marked duplicate sets: mark member files and
/// upsert per-digest group summaries, checkpointing progress per batch so
/// an interrupted rebuild can resume from `last_digest`.
///
/// The mark and the group upsert are separate transactions; a crash or
/// cancellation between them is recovered by re-running (idempotent).
pub fn materialize(
    db: &Database,
    opts: &MaterializeOptions,
    cancel: &AtomicBool,
    retry: &RetryPolicy,
) -> Result<MaterializeSummary, Error> {
    if opts.reset {
        info!("resetting duplicate state (is_duplicate = 0, duplicate_groups cleared)");
        retry.execute("dupes_reset", || db.reset_duplicates())?;
    }

    let resume = opts.resume_after.as_deref();
    let total_groups = db.count_duplicate_groups(resume)?;
    let run_id = db.start_duplicate_run(total_groups, &opts.note)?;
    info!(run_id, total_groups, "duplicate materialization starting");

    let mut counters = RunCounters::default();
    let result = process_groups(db, opts, cancel, retry, run_id, total_groups, &mut counters);

    let status = if result.is_ok() { "done" } else { "failed" };
    if let Err(e) = db.finish_duplicate_run(run_id, status, counters.last_digest.as_deref()) {
        warn!(run_id, error = %e, "failed to finalize duplicate run row");
    }
    result?;

    info!(
        run_id,
        groups = counters.groups,
        files = counters.files,
        size_gb = format!("{:.2}", counters.bytes as f64 / GIB),
        "duplicate materialization done"
    );
    Ok(MaterializeSummary {
        run_id,
        groups: counters.groups,
        files: counters.files,
        bytes: counters.bytes,
    })
}

fn process_groups(
    db: &Database,
    opts: &MaterializeOptions,
    cancel: &AtomicBool,
    retry: &RetryPolicy,
    run_id: i64,
    total_groups: i64,
    counters: &mut RunCounters,
) -> Result<(), Error> {
    let groups = db.duplicate_group_rows(opts.resume_after.as_deref())?;
    let started = Instant::now();
    let batch_size = opts.batch_size.max(1);

    for batch in groups.chunks(batch_size) {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let digests: Vec<String> = batch.iter().map(|g| g.digest.clone()).collect();
        retry.execute("dupes_mark", || db.mark_duplicates(&digests))?;
        let base = counters.clone();
        *counters = retry.execute("dupes_groups", || {
            db.commit_group_batch(run_id, batch, &base)
        })?;

        if opts.progress_every > 0 && counters.groups % opts.progress_every as i64 == 0 {
            let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
            let pct = if total_groups > 0 {
                counters.groups as f64 * 100.0 / total_groups as f64
            } else {
                100.0
            };
            info!(
                groups = counters.groups,
                total_groups,
                pct = format!("{pct:.1}"),
                files = counters.files,
                size_gb = format!("{:.2}", counters.bytes as f64 / GIB),
                groups_per_sec = format!("{:.1}", counters.groups as f64 / elapsed),
                last_digest = counters.last_digest.as_deref().unwrap_or(""),
                "materialization progress"
            );
        }
    }
    Ok(())
}

use crossbeam_channel::{select, tick, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::adaptive::AdaptiveSizing;
use crate::retry::RetryPolicy;
use crate::storage::models::{FileRow, FolderInsert};
use crate::storage::Database;

/// Byte-size target per file batch.
const TARGET_BATCH_BYTES: i64 = 100 * 1024 * 1024;
/// Below this row count a batch is only flushed at the half-target byte mark.
const MIN_BATCH_ROWS: usize = 1_000;
/// Idle flush interval.
const FLUSH_TICK: Duration = Duration::from_secs(5);

/// Messages consumed by the write serializer. Folder inserts carry a reply
/// channel because traversal cannot descend before it knows the folder id.
pub enum WriterMsg {
    InsertFolder {
        req: FolderInsert,
        reply: Sender<i64>,
    },
    InsertFiles(Vec<FileRow>),
    Shutdown,
}

/// Flush policy combining a hard row cap (adaptive), a byte-size target and
/// a min-rows/half-target rule.
struct BatchSizer {
    bytes: i64,
    rows: usize,
}

impl BatchSizer {
    fn new() -> Self {
        Self { bytes: 0, rows: 0 }
    }

    fn note(&mut self, file_size: i64) {
        self.bytes += file_size;
        self.rows += 1;
    }

    fn should_flush(&self, max_rows: usize) -> bool {
        self.rows >= max_rows
            || self.bytes >= TARGET_BATCH_BYTES
            || (self.rows >= MIN_BATCH_ROWS && self.bytes >= TARGET_BATCH_BYTES / 2)
    }

    fn reset(&mut self) {
        self.bytes = 0;
        self.rows = 0;
    }
}

/// Phase-1 write serializer: the sole owner of store mutations while
/// traversal runs. Returns the number of file rows committed.
pub fn run(
    db: Database,
    rx: Receiver<WriterMsg>,
    sizing: Arc<AdaptiveSizing>,
    retry: RetryPolicy,
) -> u64 {
    let ticker = tick(FLUSH_TICK);
    let mut buffer: Vec<FileRow> = Vec::new();
    let mut sizer = BatchSizer::new();
    let mut rows_written: u64 = 0;

    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(WriterMsg::InsertFolder { req, reply }) => {
                    let id = match retry.execute("folder_insert", || db.upsert_folder(&req)) {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(path = %req.path, error = %e, "failed to insert folder");
                            -1
                        }
                    };
                    // A dead traversal task just means nobody is waiting.
                    let _ = reply.send(id);
                }
                Ok(WriterMsg::InsertFiles(rows)) => {
                    for row in rows {
                        sizer.note(row.size);
                        buffer.push(row);
                        if sizer.should_flush(sizing.max_batch()) {
                            rows_written += flush(&db, &retry, &mut buffer);
                            sizer.reset();
                        }
                    }
                }
                Ok(WriterMsg::Shutdown) | Err(_) => {
                    rows_written += flush(&db, &retry, &mut buffer);
                    break;
                }
            },
            recv(ticker) -> _ => {
                if !buffer.is_empty() {
                    rows_written += flush(&db, &retry, &mut buffer);
                    sizer.reset();
                }
            }
        }
    }
    info!(rows_written, "write serializer shutting down");
    rows_written
}

fn flush(db: &Database, retry: &RetryPolicy, buffer: &mut Vec<FileRow>) -> u64 {
    if buffer.is_empty() {
        return 0;
    }
    let started = Instant::now();
    let count = buffer.len();
    let written = match retry.execute("file_insert", || db.upsert_files(buffer)) {
        Ok(n) => n as u64,
        Err(e) => {
            // Retries exhausted: drop the batch and keep the pipeline alive.
            error!(count, error = %e, "file batch dropped after retries");
            0
        }
    };
    debug!(
        count,
        written,
        duration_ms = started.elapsed().as_millis() as u64,
        "file batch flushed"
    );
    buffer.clear();
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_sizer_flushes_on_row_cap() {
        let mut sizer = BatchSizer::new();
        for _ in 0..9 {
            sizer.note(1);
        }
        assert!(!sizer.should_flush(10));
        sizer.note(1);
        assert!(sizer.should_flush(10));
    }

    #[test]
    fn test_batch_sizer_flushes_on_byte_target() {
        let mut sizer = BatchSizer::new();
        sizer.note(TARGET_BATCH_BYTES);
        assert!(sizer.should_flush(10_000));
    }

    #[test]
    fn test_batch_sizer_half_target_needs_min_rows() {
        let mut sizer = BatchSizer::new();
        sizer.note(TARGET_BATCH_BYTES / 2);
        assert!(!sizer.should_flush(10_000));
        for _ in 0..MIN_BATCH_ROWS {
            sizer.note(0);
        }
        assert!(sizer.should_flush(10_000));
    }

    #[test]
    fn test_batch_sizer_reset() {
        let mut sizer = BatchSizer::new();
        sizer.note(TARGET_BATCH_BYTES);
        sizer.reset();
        assert!(!sizer.should_flush(10_000));
    }
}

/// Trait for reporting pipeline progress.
///
/// The CLI implements this with indicatif progress bars; tests and embedded
/// callers use `SilentReporter`. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_progress(&self, _files_found: u64) {}
    fn on_scan_complete(&self, _total_files: u64, _duration_secs: f64) {}
    fn on_hash_start(&self, _candidates: usize) {}
    fn on_hash_progress(&self, _files_hashed: usize, _candidates: usize) {}
    fn on_hash_complete(&self, _hashed: usize, _duration_secs: f64) {}
    fn on_materialize_start(&self) {}
    fn on_materialize_complete(&self, _groups: u64, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

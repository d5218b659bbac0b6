/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif bars. All methods have default
/// no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_snapshot_complete(&self, _dates: usize, _files: usize) {}
    fn on_plan(&self, _changed_dates: usize, _deleted_dates: usize) {}
    fn on_recognize_start(&self, _to_recognize: usize, _cache_hits: usize) {}
    fn on_recognize_progress(&self, _done: usize, _total: usize) {}
    fn on_recognize_complete(&self, _recognized: usize) {}
    fn on_filing_start(&self, _files: usize) {}
    fn on_filing_complete(&self, _written: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

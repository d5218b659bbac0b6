use facesort_pipeline::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Recognition: progress bar over the files not served from cache
/// - Filing: spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self { bar: Mutex::new(None) }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICKS),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl ProgressReporter for CliReporter {
    fn on_snapshot_complete(&self, dates: usize, files: usize) {
        eprintln!("  \x1b[32m✓\x1b[0m Snapshot: {files} photos in {dates} dates");
    }

    fn on_plan(&self, changed_dates: usize, deleted_dates: usize) {
        eprintln!("  \x1b[32m✓\x1b[0m Plan: {changed_dates} changed, {deleted_dates} deleted dates");
    }

    fn on_recognize_start(&self, to_recognize: usize, cache_hits: usize) {
        if cache_hits > 0 {
            eprintln!("  \x1b[32m✓\x1b[0m Cache: {cache_hits} photos already recognized");
        }
        if to_recognize == 0 {
            return;
        }
        let pb = ProgressBar::new(to_recognize as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Recognizing [{bar:30.cyan/dim}] {pos}/{len} photos ({eta} remaining)",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICKS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_recognize_progress(&self, done: usize, total: usize) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                if pb.length() != Some(total as u64) {
                    pb.set_length(total as u64);
                }
                pb.set_position(done as u64);
            }
        }
    }

    fn on_recognize_complete(&self, recognized: usize) {
        self.finish_bar();
        if recognized > 0 {
            eprintln!("  \x1b[32m✓\x1b[0m Recognized {recognized} photos");
        }
    }

    fn on_filing_start(&self, files: usize) {
        self.set_bar(Self::spinner(&format!("Filing {files} photos...")));
    }

    fn on_filing_complete(&self, written: usize) {
        self.finish_bar();
        eprintln!("  \x1b[32m✓\x1b[0m Filed {written} photos");
    }
}

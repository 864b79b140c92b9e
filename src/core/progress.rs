//! Progress reporting for test-run fan-out and module batches.
//!
//! Bars are only drawn when stderr is a terminal; otherwise a hidden bar keeps
//! counting so callers never branch on TTY state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Style templates.
pub mod styles {
    use super::*;

    /// Bar for a batch of test modules.
    pub fn module_batch() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }

    /// Bar for concurrent test runs inside one module.
    pub fn test_runs() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.green/white}] {pos}/{len} runs {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    /// Spinner for a single long pytest invocation.
    pub fn spinner() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

/// A cloneable progress counter shared across concurrent tasks.
#[derive(Clone)]
pub struct ProgressTracker {
    bar: ProgressBar,
    counter: Arc<AtomicUsize>,
}

impl ProgressTracker {
    /// Tracker for concurrent test runs; hidden when stderr is not a TTY.
    pub fn test_runs(total: usize, message: &str) -> Self {
        Self::with_style(total, message, styles::test_runs())
    }

    /// Tracker for a batch of modules; hidden when stderr is not a TTY.
    pub fn modules(total: usize, prefix: &str) -> Self {
        let tracker = Self::with_style(total, "", styles::module_batch());
        tracker.bar.set_prefix(prefix.to_string());
        tracker
    }

    /// A tracker that never draws.
    pub fn hidden(total: usize) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total as u64);
        Self {
            bar,
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_style(total: usize, message: &str, style: ProgressStyle) -> Self {
        if !is_tty() {
            return Self::hidden(total);
        }
        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_message(message.to_string());
        Self {
            bar,
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inc(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(1);
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.bar.set_message(msg.into());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }

    pub fn count(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

/// Check if stderr is a TTY.
pub fn is_tty() -> bool {
    use std::io::IsTerminal;
    std::io::stderr().is_terminal()
}

/// Spinner for indeterminate operations such as a full baseline run.
pub fn create_spinner(message: &str) -> ProgressBar {
    if is_tty() {
        let bar = ProgressBar::new_spinner();
        bar.set_style(styles::spinner());
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    } else {
        ProgressBar::hidden()
    }
}

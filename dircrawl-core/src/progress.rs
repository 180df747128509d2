//! Progress reporting for long fan-outs.
//!
//! A report is emitted every `batch` completed items, but only when `interval`
//! has passed since the previous report.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

pub const DEFAULT_BATCH: usize = 100;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct ProgressTracker {
    label: String,
    total: usize,
    completed: AtomicUsize,
    batch: usize,
    interval: Duration,
    last_report: Mutex<Instant>,
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>, total: usize) -> Self {
        Self::with_cadence(label, total, DEFAULT_BATCH, DEFAULT_INTERVAL)
    }

    pub fn with_cadence(
        label: impl Into<String>,
        total: usize,
        batch: usize,
        interval: Duration,
    ) -> Self {
        Self {
            label: label.into(),
            total,
            completed: AtomicUsize::new(0),
            batch: batch.max(1),
            interval,
            last_report: Mutex::new(Instant::now()),
        }
    }

    /// Counts one finished item. Returns the percentage when a report was emitted.
    pub fn tick(&self) -> Option<f64> {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if done % self.batch != 0 {
            return None;
        }
        let mut last = self.last_report.lock();
        if last.elapsed() <= self.interval {
            return None;
        }
        *last = Instant::now();
        let percent = self.percent_of(done);
        warn!(
            "{} at {:.1}% ({}/{})",
            self.label, percent, done, self.total
        );
        Some(percent)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn percent_of(&self, done: usize) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * done as f64 / self.total as f64
        }
    }
}

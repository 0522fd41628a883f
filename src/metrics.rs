use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Scheduler activity counters.
///
/// All updates are relaxed; a snapshot is a consistent view of each counter,
/// not of the set as a whole.
#[derive(Debug)]
pub struct Metrics {
    pub jobs_completed: AtomicU64,
    pub job_panics: AtomicU64,
    pub io_tasks_completed: AtomicU64,
    pub io_panics: AtomicU64,
    /// Number of times a fiber parked inside `wait`.
    pub fibers_parked: AtomicU64,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            job_panics: AtomicU64::new(0),
            io_tasks_completed: AtomicU64::new(0),
            io_panics: AtomicU64::new(0),
            fibers_parked: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            job_panics: self.job_panics.load(Ordering::Relaxed),
            io_tasks_completed: self.io_tasks_completed.load(Ordering::Relaxed),
            io_panics: self.io_panics.load(Ordering::Relaxed),
            fibers_parked: self.fibers_parked.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_completed: u64,
    pub job_panics: u64,
    pub io_tasks_completed: u64,
    pub io_panics: u64,
    pub fibers_parked: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_metrics_creation() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.jobs_completed, 0);
        assert_eq!(snapshot.job_panics, 0);
        assert_eq!(snapshot.io_tasks_completed, 0);
        assert_eq!(snapshot.fibers_parked, 0);
        assert!(snapshot.elapsed_seconds >= 0.0);
    }

    #[test]
    fn test_throughput_calculation() {
        let metrics = Metrics::new();
        metrics.jobs_completed.fetch_add(100, Ordering::Relaxed);
        Metrics::bump(&metrics.jobs_completed);

        thread::sleep(Duration::from_millis(10));
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.jobs_completed, 101);
        assert!(snapshot.jobs_per_second() > 0.0);
    }
}

//! Scheduler configuration.

use crate::PinningStrategy;
use crate::error::SchedulerError;
use crate::thread::ThreadPriority;
use serde::{Deserialize, Serialize};

/// Default number of fibers created at startup.
pub const DEFAULT_FIBER_POOL_SIZE: usize = 128;

/// Default stack size of each fiber in bytes.
pub const DEFAULT_FIBER_STACK_SIZE: usize = 512 * 1024;

const MIN_FIBER_STACK_SIZE: usize = 16 * 1024;

/// Configuration for a [`Scheduler`](crate::Scheduler).
///
/// Every capacity here is fixed for the lifetime of the scheduler. Running out
/// of fibers is a fatal error, so size `fiber_pool_size` for the deepest
/// nesting of `wait` calls the application performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of job workers. `None` uses the logical CPU count.
    pub job_workers: Option<usize>,
    /// Number of IO workers. `None` uses half the job workers (at least one).
    pub io_workers: Option<usize>,
    /// Number of fibers shared by all job workers.
    pub fiber_pool_size: usize,
    /// Stack size of each fiber in bytes.
    pub fiber_stack_size: usize,
    /// How job workers are pinned to cores. IO workers are never pinned.
    pub job_pinning: PinningStrategy,
    pub job_priority: ThreadPriority,
    pub io_priority: ThreadPriority,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_workers: None,
            io_workers: None,
            fiber_pool_size: DEFAULT_FIBER_POOL_SIZE,
            fiber_stack_size: DEFAULT_FIBER_STACK_SIZE,
            job_pinning: PinningStrategy::Linear,
            job_priority: ThreadPriority::High,
            io_priority: ThreadPriority::Low,
        }
    }
}

impl SchedulerConfig {
    /// Config with explicit worker counts and default everything else.
    pub fn with_workers(job_workers: usize, io_workers: usize) -> Self {
        Self {
            job_workers: Some(job_workers),
            io_workers: Some(io_workers),
            ..Self::default()
        }
    }

    /// Job worker count after resolving `None` against the CPU count.
    pub fn resolved_job_workers(&self) -> usize {
        self.job_workers.unwrap_or_else(num_cpus::get)
    }

    /// IO worker count after resolving `None` against the job worker count.
    pub fn resolved_io_workers(&self) -> usize {
        self.io_workers
            .unwrap_or_else(|| self.resolved_job_workers() / 2)
            .max(1)
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        let job_workers = self.resolved_job_workers();
        if job_workers == 0 {
            return Err(SchedulerError::invalid_config(
                "at least one job worker is required",
            ));
        }
        if self.fiber_pool_size < job_workers {
            return Err(SchedulerError::invalid_config(format!(
                "fiber pool of {} cannot host {} job workers",
                self.fiber_pool_size, job_workers
            )));
        }
        if self.fiber_stack_size < MIN_FIBER_STACK_SIZE {
            return Err(SchedulerError::invalid_config(format!(
                "fiber stack of {} bytes is below the {} byte minimum",
                self.fiber_stack_size, MIN_FIBER_STACK_SIZE
            )));
        }
        Ok(())
    }
}

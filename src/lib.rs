//! # jobfiber - Hybrid Thread + Fiber Job Scheduler
//!
//! A fixed pool of OS worker threads executes a much larger number of short,
//! dependency-tracked jobs without ever blocking a worker thread on a
//! dependency. Jobs run on lightweight stackful fibers; a job that waits on a
//! [`Counter`] parks its fiber and the worker moves on to other queued work.
//!
//! ## Architecture
//!
//! - **Fibers**: stackful coroutines, all created at startup and recycled
//!   through a fixed-capacity pool
//! - **Job queue / IO queue**: blocking MPMC FIFOs of work
//! - **Counters**: completion tracking with a single waiter, either a parked
//!   fiber or a blocked OS thread
//! - **Job workers**: one per logical CPU, pinned and high priority, each
//!   hosting fibers
//! - **IO workers**: half as many, unpinned and low priority, for blocking
//!   work
//!
//! Capacity is fixed at startup. Exhausting the fiber pool is a fatal error,
//! not a growth trigger.
//!
//! ## Example
//!
//! ```no_run
//! use jobfiber::{Counter, Job, Scheduler};
//!
//! let scheduler = Scheduler::init().unwrap();
//! let handle = scheduler.handle();
//!
//! let root = Counter::new();
//! scheduler.run(&root, Job::new(move || {
//!     let children = Counter::new();
//!     handle.run_batch(&children, (0..4).map(|i| Job::new(move || println!("child {i}"))));
//!     // Parks this fiber; the worker keeps running other jobs.
//!     handle.wait(&children);
//! }));
//!
//! // Blocks this (non-worker) thread.
//! scheduler.wait_async(&root);
//! scheduler.term().unwrap();
//! ```

/// Fails on a broken scheduler invariant. See `context::fatal`.
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::context::fatal(format_args!($($arg)*))
    };
}

pub mod config;
mod context;
pub mod counter;
pub mod error;
mod fiber;
mod fiber_pool;
pub mod job;
pub mod metrics;
mod queue;
pub mod scheduler;
pub mod thread;
mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning job worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to even-numbered logical processors first, avoiding SMT contention
    /// until the physical cores run out.
    AvoidSMT,
}

pub use config::SchedulerConfig;
pub use counter::{Counter, IoCounter};
pub use error::SchedulerError;
pub use job::Job;
pub use metrics::MetricsSnapshot;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use thread::ThreadPriority;

#[cfg(test)]
mod tests;

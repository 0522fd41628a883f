//! Job definitions and execution logic.
//!
//! Jobs run on the fiber-hosting job workers and are tracked by a
//! [`Counter`]. IO tasks run on the IO workers and are optionally tracked by
//! an [`IoCounter`].

use crate::counter::{Counter, IoCounter};
use crate::metrics::Metrics;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

type Work = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work to be executed by the job workers.
///
/// The counter is attached when the job is submitted with
/// [`SchedulerHandle::run`](crate::SchedulerHandle::run) or
/// [`SchedulerHandle::run_batch`](crate::SchedulerHandle::run_batch).
pub struct Job {
    work: Work,
    counter: Option<Counter>,
}

impl Job {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            work: Box::new(work),
            counter: None,
        }
    }

    pub(crate) fn attach(&mut self, counter: &Counter) {
        self.counter = Some(counter.clone());
    }

    /// Runs the job to completion and hands back the counter to decrement.
    ///
    /// A panicking job is logged and counted; its counter is still returned
    /// so waiters are never stranded.
    pub(crate) fn execute(self, metrics: &Metrics) -> Option<Counter> {
        let Job { work, counter } = self;
        match catch_unwind(AssertUnwindSafe(work)) {
            Ok(()) => Metrics::bump(&metrics.jobs_completed),
            Err(payload) => {
                Metrics::bump(&metrics.job_panics);
                tracing::error!(panic = panic_message(payload.as_ref()), "job panicked");
            }
        }
        counter
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// A closure queued for the IO workers.
pub(crate) struct IoTask {
    work: Work,
    counter: Option<IoCounter>,
}

impl IoTask {
    pub(crate) fn new(work: Work, counter: Option<IoCounter>) -> Self {
        IoTask { work, counter }
    }

    pub(crate) fn execute(self, metrics: &Metrics) {
        let IoTask { work, counter } = self;
        match catch_unwind(AssertUnwindSafe(work)) {
            Ok(()) => Metrics::bump(&metrics.io_tasks_completed),
            Err(payload) => {
                Metrics::bump(&metrics.io_panics);
                tracing::error!(panic = panic_message(payload.as_ref()), "IO task panicked");
            }
        }
        if let Some(counter) = counter {
            counter.decrement();
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

//! Error types for scheduler construction and shutdown.
//!
//! Misuse of the scheduling primitives (waiting from the wrong kind of
//! thread, double waiters, re-running a busy counter, fiber pool exhaustion)
//! is a programming error and panics. Only conditions the caller can act on
//! surface as [`SchedulerError`].

use std::io;
use thiserror::Error;

/// Errors reported by [`Scheduler`](crate::Scheduler) lifecycle operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The configuration cannot produce a working scheduler.
    #[error("invalid scheduler configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A fiber stack could not be allocated.
    #[error("failed to allocate fiber stack: {0}")]
    FiberStack(#[source] io::Error),

    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// One or more worker threads panicked before shutdown completed.
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked { count: usize },
}

impl SchedulerError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        SchedulerError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

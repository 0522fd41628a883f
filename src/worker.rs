//! Worker thread implementation.
//!
//! Job workers host fibers: the native thread stack only runs a trampoline
//! that keeps resuming the worker's current fiber until that fiber reports a
//! shutdown sentinel. IO workers are plain blocking loops over the IO queue.

use crate::PinningStrategy;
use crate::context::{self, ExecutionContext};
use crate::error::SchedulerError;
use crate::fiber::{FiberSignal, Transfer};
use crate::scheduler::Shared;
use crate::thread::{self as placement, ThreadPriority};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    Job,
    Io,
}

/// Placement requested for a worker thread.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ThreadParams {
    pub priority: ThreadPriority,
    pub pinning: PinningStrategy,
}

/// A running worker thread.
pub struct Worker {
    kind: WorkerKind,
    index: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        kind: WorkerKind,
        index: usize,
        shared: Arc<Shared>,
        params: ThreadParams,
    ) -> Result<Self, SchedulerError> {
        let name = match kind {
            WorkerKind::Job => format!("Job #{}", index + 1),
            WorkerKind::Io => format!("I/O #{}", index + 1),
        };
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                context::mark_worker_thread();
                apply_placement(kind, index, params);
                match kind {
                    WorkerKind::Job => job_main(index, shared),
                    WorkerKind::Io => io_main(shared),
                }
            })
            .map_err(|source| SchedulerError::Spawn { name, source })?;

        Ok(Worker {
            kind,
            index,
            handle: Some(handle),
        })
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

fn apply_placement(kind: WorkerKind, index: usize, params: ThreadParams) {
    if let Some(core) = placement::pin_current(params.pinning, index) {
        tracing::debug!(?kind, worker = index + 1, core, "pinned worker");
    }
    if !placement::set_current_priority(params.priority) {
        tracing::debug!(?kind, worker = index + 1, priority = ?params.priority, "priority change refused");
    }
}

/// Job worker main: convert into a fiber host and run the trampoline.
fn job_main(index: usize, shared: Arc<Shared>) {
    let ctx = Box::new(ExecutionContext::new(index, Arc::clone(&shared)));
    ctx.install();
    ctx.set_current_fiber(Some(shared.fibers.acquire()));
    tracing::debug!(worker = index + 1, "job worker started");

    loop {
        let fiber = ctx.running_fiber();
        match fiber.fiber().resume(FiberSignal::Run) {
            Some(Transfer::Switch) => continue,
            Some(Transfer::Shutdown) => break,
            None => fatal!("fiber {} left its job loop while scheduled", fiber.fiber().id()),
        }
    }

    // The fiber that consumed the sentinel stays suspended in the pool.
    shared.fibers.release(ctx.running_fiber());
    ctx.set_current_fiber(None);
    ExecutionContext::uninstall();
    tracing::debug!(worker = index + 1, "job worker exited");
}

fn io_main(shared: Arc<Shared>) {
    while let Some(task) = shared.io.pop() {
        task.execute(&shared.metrics);
    }
    tracing::debug!("IO worker exited");
}

//! High-level scheduler interface.
//!
//! A [`Scheduler`] owns the worker threads, the work queues and the fiber
//! pool for its whole lifetime: everything is created by [`Scheduler::init`]
//! or [`Scheduler::with_config`] and torn down by [`Scheduler::term`]. Work is
//! submitted through a [`SchedulerHandle`], which the scheduler derefs to and
//! which jobs can capture to fan out and wait from inside a fiber.

use crate::config::SchedulerConfig;
use crate::context::ExecutionContext;
use crate::counter::{Counter, IoCounter};
use crate::error::SchedulerError;
use crate::fiber::Transfer;
use crate::fiber_pool::FiberPool;
use crate::job::{IoTask, Job};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::queue::WorkQueue;
use crate::worker::{ThreadParams, Worker, WorkerKind};
use crate::PinningStrategy;
use crossbeam::sync::Parker;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// State shared by the scheduler, its handles and every worker.
pub(crate) struct Shared {
    pub(crate) jobs: WorkQueue<Job>,
    pub(crate) io: WorkQueue<IoTask>,
    pub(crate) fibers: FiberPool,
    pub(crate) metrics: Metrics,
    job_workers: usize,
    io_workers: usize,
    terminated: AtomicBool,
}

/// Cloneable handle for submitting and waiting on work.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    fn check_running(&self) {
        if self.shared.terminated.load(Ordering::Acquire) {
            fatal!("scheduler terminated");
        }
    }

    /// Queues a fire-and-forget task on the IO workers.
    ///
    /// IO workers are meant for blocking and OS-bound work that must not
    /// occupy a job worker.
    pub fn run_io<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.check_running();
        self.shared.io.push(IoTask::new(Box::new(work), None));
    }

    /// Queues a task on the IO workers, tracked by `counter`.
    pub fn run_io_tracked<F>(&self, counter: &IoCounter, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.check_running();
        counter.increment();
        self.shared
            .io
            .push(IoTask::new(Box::new(work), Some(counter.clone())));
    }

    /// Submits one job tracked by `counter`.
    ///
    /// # Panics
    ///
    /// Panics if `counter` still has outstanding work. On a worker thread
    /// this aborts the process instead.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use jobfiber::{Counter, Job, Scheduler};
    ///
    /// let scheduler = Scheduler::init().unwrap();
    /// let counter = Counter::new();
    /// scheduler.run(&counter, Job::new(|| println!("Hello from a job!")));
    /// scheduler.wait_async(&counter);
    /// scheduler.term().unwrap();
    /// ```
    pub fn run(&self, counter: &Counter, mut job: Job) {
        self.check_running();
        counter.begin(1);
        job.attach(counter);
        self.shared.jobs.push(job);
    }

    /// Submits a batch of jobs that share `counter`.
    ///
    /// An empty batch leaves the counter done.
    ///
    /// # Panics
    ///
    /// Panics if `counter` still has outstanding work. On a worker thread
    /// this aborts the process instead.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use jobfiber::{Counter, Job, Scheduler};
    ///
    /// let scheduler = Scheduler::init().unwrap();
    /// let counter = Counter::new();
    /// scheduler.run_batch(&counter, (0..8).map(|i| Job::new(move || println!("job {i}"))));
    /// scheduler.wait_async(&counter);
    /// scheduler.term().unwrap();
    /// ```
    pub fn run_batch<I>(&self, counter: &Counter, jobs: I)
    where
        I: IntoIterator<Item = Job>,
    {
        self.check_running();
        let jobs: Vec<Job> = jobs.into_iter().collect();
        let Ok(count) = u32::try_from(jobs.len()) else {
            fatal!("batch of {} jobs exceeds the counter range", jobs.len());
        };
        counter.begin(count);
        for mut job in jobs {
            job.attach(counter);
            self.shared.jobs.push(job);
        }
    }

    /// Waits for `counter` from inside a job without blocking the worker.
    ///
    /// The calling fiber is parked and the worker picks up other jobs on a
    /// fresh fiber. The parked fiber resumes, possibly on another worker,
    /// once the last job tracked by `counter` completes.
    ///
    /// # Panics
    ///
    /// Panics when called outside a job of this scheduler. Inside a job,
    /// a second waiter on `counter` or an exhausted fiber pool aborts the
    /// process.
    pub fn wait(&self, counter: &Counter) {
        let Some(ctx) = ExecutionContext::current() else {
            fatal!("wait called outside a job worker");
        };
        if !Arc::ptr_eq(ctx.shared(), &self.shared) {
            fatal!("wait called from a job worker of another scheduler");
        }
        if counter.done() {
            return;
        }

        let Some(epoch) = counter.claim_fiber_wait() else {
            fatal!("multiple waiters on one counter");
        };

        // The last job may have finished between the first check and the claim.
        if counter.done_since(epoch) {
            counter.abandon_fiber_wait(epoch);
            return;
        }

        let fibers = &self.shared.fibers;
        let next = fibers.acquire();
        let parked = ctx.park_running(next, counter, epoch);
        counter.publish_fiber(parked);
        Metrics::bump(&self.shared.metrics.fibers_parked);
        tracing::trace!(worker = ctx.index() + 1, fiber = parked.fiber().id(), "fiber parked");

        let _ = parked.fiber().suspend(Transfer::Switch);

        // Resumed by the worker that completed the counter.
        let ctx = ExecutionContext::expect_current();
        counter.finish_fiber_wait(epoch);
        fibers.release(ctx.take_idle_retired());
    }

    /// Blocks the calling OS thread until `counter` is done.
    ///
    /// This is how code outside the job workers synchronizes with jobs.
    ///
    /// # Panics
    ///
    /// Panics when another fiber or thread is already waiting on `counter`.
    /// Calling it from inside a job aborts the process.
    pub fn wait_async(&self, counter: &Counter) {
        if ExecutionContext::current().is_some() {
            fatal!("wait_async called on a job worker");
        }
        if counter.done() {
            return;
        }

        let parker = Parker::new();
        let Some(epoch) = counter.register_thread(parker.unparker().clone()) else {
            fatal!("multiple waiters on one counter");
        };
        while !counter.done_since(epoch) {
            parker.park();
        }
        counter.unregister_thread(epoch);
    }

    /// Whether the calling code runs inside a job fiber.
    pub fn on_job_worker() -> bool {
        ExecutionContext::current().is_some()
    }

    pub fn job_workers(&self) -> usize {
        self.shared.job_workers
    }

    pub fn io_workers(&self) -> usize {
        self.shared.io_workers
    }

    pub fn fiber_capacity(&self) -> usize {
        self.shared.fibers.capacity()
    }

    /// Number of fibers neither running nor parked.
    pub fn idle_fibers(&self) -> usize {
        self.shared.fibers.idle_count()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

/// The scheduler: worker threads, queues and fiber pool.
///
/// Dereferences to its [`SchedulerHandle`].
pub struct Scheduler {
    handle: SchedulerHandle,
    job_workers: Vec<Worker>,
    io_workers: Vec<Worker>,
}

impl Scheduler {
    /// Starts a scheduler sized to this machine: one pinned, high priority
    /// job worker per logical CPU and half as many IO workers.
    pub fn init() -> Result<Self, SchedulerError> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Starts a scheduler with an explicit configuration.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let job_workers = config.resolved_job_workers();
        let io_workers = config.resolved_io_workers();

        let shared = Arc::new(Shared {
            jobs: WorkQueue::new("job"),
            io: WorkQueue::new("I/O"),
            fibers: FiberPool::new(config.fiber_pool_size, config.fiber_stack_size)?,
            metrics: Metrics::new(),
            job_workers,
            io_workers,
            terminated: AtomicBool::new(false),
        });

        let mut scheduler = Scheduler {
            handle: SchedulerHandle {
                shared: Arc::clone(&shared),
            },
            job_workers: Vec::with_capacity(job_workers),
            io_workers: Vec::with_capacity(io_workers),
        };

        let io_params = ThreadParams {
            priority: config.io_priority,
            pinning: PinningStrategy::None,
        };
        for index in 0..io_workers {
            let worker = Worker::spawn(WorkerKind::Io, index, Arc::clone(&shared), io_params)?;
            scheduler.io_workers.push(worker);
        }

        let job_params = ThreadParams {
            priority: config.job_priority,
            pinning: config.job_pinning,
        };
        for index in 0..job_workers {
            let worker = Worker::spawn(WorkerKind::Job, index, Arc::clone(&shared), job_params)?;
            scheduler.job_workers.push(worker);
        }

        tracing::info!(
            job_workers,
            io_workers,
            fibers = config.fiber_pool_size,
            "scheduler started"
        );
        Ok(scheduler)
    }

    /// Returns a cloneable handle to this scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Shuts the scheduler down.
    ///
    /// Every worker consumes one shutdown sentinel after the work queued
    /// before it; in-flight jobs are not cancelled. Once all workers exited
    /// cleanly, both queues must be empty and every fiber back in the pool.
    ///
    /// Returns an error if any worker thread panicked.
    pub fn term(mut self) -> Result<(), SchedulerError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if self.job_workers.is_empty() && self.io_workers.is_empty() {
            return Ok(());
        }
        let shared = Arc::clone(&self.handle.shared);
        let mut panicked = 0;

        for _ in 0..self.io_workers.len() {
            shared.io.push_sentinel();
        }
        panicked += join_all(self.io_workers.drain(..));

        for _ in 0..self.job_workers.len() {
            shared.jobs.push_sentinel();
        }
        panicked += join_all(self.job_workers.drain(..));

        shared.terminated.store(true, Ordering::Release);

        if panicked > 0 {
            tracing::error!(panicked, "scheduler shut down with failed workers");
            return Err(SchedulerError::WorkerPanicked { count: panicked });
        }
        if !thread::panicking() {
            assert!(
                shared.jobs.is_empty(),
                "{} jobs left queued after shutdown",
                shared.jobs.len()
            );
            assert!(
                shared.io.is_empty(),
                "{} I/O tasks left queued after shutdown",
                shared.io.len()
            );
            assert_eq!(
                shared.fibers.idle_count(),
                shared.fibers.capacity(),
                "fibers leaked past shutdown"
            );
        }
        shared.fibers.finish_idle();
        tracing::info!("scheduler terminated");
        Ok(())
    }
}

fn join_all(workers: impl Iterator<Item = Worker>) -> usize {
    let mut panicked = 0;
    for worker in workers {
        let (kind, index) = (worker.kind(), worker.index());
        if worker.join().is_err() {
            tracing::error!(?kind, worker = index + 1, "worker panicked");
            panicked += 1;
        }
    }
    panicked
}

impl Deref for Scheduler {
    type Target = SchedulerHandle;

    fn deref(&self) -> &SchedulerHandle {
        &self.handle
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(%err, "scheduler shutdown failed");
        }
    }
}

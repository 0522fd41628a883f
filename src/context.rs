//! Per-worker execution context and the fiber job loop.
//!
//! Every job worker owns one [`ExecutionContext`] for its whole lifetime. It
//! records which fiber is running job code on the worker and which fiber was
//! just retired from it, and why. The worker's native stack is the "main"
//! context: it only runs the trampoline that resumes the current fiber, and
//! never runs job code itself.
//!
//! Fibers migrate: a fiber parked in `wait` on worker A is resumed by
//! whichever worker completes its counter. Any code that can run on both
//! sides of a suspension point must therefore look the context up again
//! through [`ExecutionContext::expect_current`] afterwards.

use crate::counter::Counter;
use crate::fiber::{FiberHandle, FiberSignal, Transfer};
use crate::scheduler::Shared;
use corosensei::Yielder;
use std::cell::Cell;
use std::fmt;
use std::panic::Location;
use std::process;
use std::ptr;
use std::sync::Arc;

thread_local! {
    static CURRENT_CONTEXT: Cell<*const ExecutionContext> = const { Cell::new(ptr::null()) };
    static WORKER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the calling thread as a scheduler worker for [`fatal`].
pub(crate) fn mark_worker_thread() {
    WORKER_THREAD.with(|w| w.set(true));
}

/// Reports a broken scheduler invariant.
///
/// Workers isolate panics raised by job and IO closures, so on a worker
/// thread this aborts the process instead of unwinding. Elsewhere it is an
/// ordinary panic.
#[cold]
#[track_caller]
pub(crate) fn fatal(args: fmt::Arguments<'_>) -> ! {
    if !WORKER_THREAD.with(|w| w.get()) {
        panic!("{args}");
    }
    let location = Location::caller();
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    tracing::error!(%location, worker = name, "fatal: {args}");
    eprintln!("thread '{name}' hit a fatal scheduler error at {location}: {args}");
    process::abort();
}

/// Why the previous fiber left this worker.
pub(crate) enum Retired {
    /// It handed the worker to a resumed waiter and is free for reuse. The
    /// waiter returns it to the pool.
    Idle(FiberHandle),
    /// It parked on `counter`. The fiber itself now belongs to the counter;
    /// the next fiber to run here only has to mark it release-safe.
    Parked { counter: Counter, epoch: u32 },
}

pub(crate) struct ExecutionContext {
    index: usize,
    shared: Arc<Shared>,
    current: Cell<Option<FiberHandle>>,
    retired: Cell<Option<Retired>>,
}

impl ExecutionContext {
    pub(crate) fn new(index: usize, shared: Arc<Shared>) -> Self {
        ExecutionContext {
            index,
            shared,
            current: Cell::new(None),
            retired: Cell::new(None),
        }
    }

    /// Makes `self` the context of the calling thread until [`Self::uninstall`].
    pub(crate) fn install(&self) {
        CURRENT_CONTEXT.with(|c| c.set(self as *const _));
    }

    pub(crate) fn uninstall() {
        CURRENT_CONTEXT.with(|c| c.set(ptr::null()));
    }

    /// The context of the calling job worker, if any.
    ///
    /// Never inlined: a fiber may resume on a different thread, and the
    /// thread-local address must not be cached across a suspension.
    #[inline(never)]
    pub(crate) fn current() -> Option<&'static ExecutionContext> {
        let ctx = CURRENT_CONTEXT.with(|c| c.get());
        // SAFETY: the context is installed by its worker thread for the
        // lifetime of that thread's main frame, and only that thread reads it.
        unsafe { ctx.as_ref() }
    }

    pub(crate) fn expect_current() -> &'static ExecutionContext {
        match Self::current() {
            Some(ctx) => ctx,
            None => fatal!("no execution context on this thread"),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn set_current_fiber(&self, fiber: Option<FiberHandle>) {
        self.current.set(fiber);
    }

    pub(crate) fn running_fiber(&self) -> FiberHandle {
        match self.current.get() {
            Some(fiber) => fiber,
            None => fatal!("job worker #{} has no running fiber", self.index + 1),
        }
    }

    /// Cleanup on (re)entry into the job loop: if the fiber this one replaced
    /// parked on a counter, it is now fully suspended and safe to resume.
    pub(crate) fn release_parked_waiter(&self) {
        match self.retired.take() {
            Some(Retired::Parked { counter, epoch }) => counter.mark_fiber_parked(epoch),
            other => self.retired.set(other),
        }
    }

    /// Retires the running fiber as parked on `counter` and makes `next` the
    /// current fiber. Returns the parked fiber.
    pub(crate) fn park_running(&self, next: FiberHandle, counter: &Counter, epoch: u32) -> FiberHandle {
        let parked = self.running_fiber();
        self.retired.set(Some(Retired::Parked {
            counter: counter.clone(),
            epoch,
        }));
        self.current.set(Some(next));
        parked
    }

    /// Retires the running fiber as idle and makes `waiter` the current
    /// fiber. Returns the retired fiber.
    pub(crate) fn hand_off_to(&self, waiter: FiberHandle) -> FiberHandle {
        let retired = self.running_fiber();
        self.retired.set(Some(Retired::Idle(retired)));
        self.current.set(Some(waiter));
        retired
    }

    /// Takes the fiber retired by the hand-off that resumed us.
    pub(crate) fn take_idle_retired(&self) -> FiberHandle {
        match self.retired.take() {
            Some(Retired::Idle(fiber)) => fiber,
            _ => fatal!("resumed waiter found no idle fiber to recycle"),
        }
    }
}

/// Handles the signal a suspended fiber was resumed with. Returns `false`
/// when the fiber must leave its job loop.
fn on_resume(signal: FiberSignal) -> bool {
    match signal {
        FiberSignal::Run => {
            ExecutionContext::expect_current().release_parked_waiter();
            true
        }
        FiberSignal::Exit => false,
    }
}

/// Entry point of every fiber: dequeue, run, complete, repeat.
pub(crate) fn fiber_main(yielder: &Yielder<FiberSignal, Transfer>) {
    let ctx = ExecutionContext::expect_current();
    ctx.running_fiber().fiber().bind(yielder);
    ctx.release_parked_waiter();

    loop {
        let ctx = ExecutionContext::expect_current();
        let shared = Arc::clone(ctx.shared());

        let Some(job) = shared.jobs.pop() else {
            drop(shared);
            let fiber = ctx.running_fiber();
            tracing::trace!(worker = ctx.index() + 1, fiber = fiber.fiber().id(), "shutdown sentinel");
            if !on_resume(fiber.fiber().suspend(Transfer::Shutdown)) {
                return;
            }
            continue;
        };

        // The job may park inside `wait` and come back on another worker.
        let counter = job.execute(&shared.metrics);
        drop(shared);

        let Some(counter) = counter else { continue };
        let Some(waiter) = counter.complete_one() else {
            continue;
        };
        drop(counter);

        let ctx = ExecutionContext::expect_current();
        let retired = ctx.hand_off_to(waiter);
        if !on_resume(retired.fiber().suspend(Transfer::Switch)) {
            return;
        }
    }
}

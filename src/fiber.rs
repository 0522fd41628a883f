//! Fiber management and execution context switching.
//!
//! A fiber is a stackful coroutine that runs the job loop. Fibers are created
//! once at startup and recycled through the [`FiberPool`](crate::fiber_pool::FiberPool);
//! a fiber that parks inside `wait` keeps its stack until the counter it waits
//! on completes, possibly on another worker thread.
//!
//! Fibers never switch to each other directly. A fiber that wants to hand the
//! worker to another fiber records the target in the worker's
//! [`ExecutionContext`](crate::context::ExecutionContext) and suspends with
//! [`Transfer::Switch`]; the worker trampoline then resumes the new current
//! fiber.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::{Cell, UnsafeCell};
use std::io;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

/// Value a fiber receives when it is resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FiberSignal {
    /// Continue running jobs.
    Run,
    /// Unwind the job loop and finish the coroutine.
    Exit,
}

/// Value a fiber hands back to the worker trampoline when it suspends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// Resume whichever fiber is now current on this worker.
    Switch,
    /// The worker received a shutdown sentinel.
    Shutdown,
}

type FiberCoroutine = Coroutine<FiberSignal, Transfer, (), DefaultStack>;
type FiberYielder = Yielder<FiberSignal, Transfer>;

/// Stackful cooperative execution context.
pub struct Fiber {
    id: usize,
    coroutine: UnsafeCell<ManuallyDrop<FiberCoroutine>>,
    /// Set on first entry; valid for as long as the coroutine is alive.
    yielder: Cell<*const FiberYielder>,
}

// SAFETY: a fiber is only ever touched by the one thread that currently owns
// its handle (the pool, a worker's execution context, or a counter's waiter
// slot hand it over with acquire/release synchronization).
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Creates a suspended fiber whose first resume with
    /// [`FiberSignal::Run`] calls `entry`.
    pub fn new(id: usize, stack_size: usize, entry: fn(&FiberYielder)) -> io::Result<Self> {
        let stack = DefaultStack::new(stack_size)?;
        let coroutine = Coroutine::with_stack(stack, move |yielder: &FiberYielder, signal| {
            if signal == FiberSignal::Run {
                entry(yielder);
            }
        });
        Ok(Fiber {
            id,
            coroutine: UnsafeCell::new(ManuallyDrop::new(coroutine)),
            yielder: Cell::new(ptr::null()),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Records the yielder handed to the coroutine body.
    pub(crate) fn bind(&self, yielder: &FiberYielder) {
        self.yielder.set(yielder as *const _);
    }

    /// Runs the fiber until it suspends. Must not be called from inside the
    /// fiber itself.
    pub(crate) fn resume(&self, signal: FiberSignal) -> Option<Transfer> {
        // SAFETY: the caller owns this fiber exclusively and it is suspended.
        let coroutine = unsafe { &mut *self.coroutine.get() };
        match coroutine.resume(signal) {
            CoroutineResult::Yield(transfer) => Some(transfer),
            CoroutineResult::Return(()) => None,
        }
    }

    /// Suspends the calling fiber. Must be called from inside this fiber.
    pub(crate) fn suspend(&self, transfer: Transfer) -> FiberSignal {
        let yielder = self.yielder.get();
        if yielder.is_null() {
            fatal!("fiber suspended before it was entered");
        }
        // SAFETY: the yielder lives on this fiber's stack for as long as the
        // coroutine body runs, and we are running inside that body.
        unsafe { (*yielder).suspend(transfer) }
    }

    /// Whether the coroutine is suspended mid-body.
    pub(crate) fn is_suspended(&self) -> bool {
        // SAFETY: only the owner calls this, never while the fiber runs.
        let coroutine = unsafe { &*self.coroutine.get() };
        coroutine.started() && !coroutine.done()
    }

    /// Lets an idle fiber return from its job loop so its stack is released
    /// cleanly. No-op for fibers that never started or already finished.
    pub(crate) fn finish(&self) {
        if self.is_suspended() {
            let transfer = self.resume(FiberSignal::Exit);
            debug_assert!(transfer.is_none(), "fiber ignored the exit signal");
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.is_suspended() {
            // Parked in the middle of a job: unwinding it from here would run
            // job code on the wrong thread, so the stack is leaked instead.
            tracing::warn!(fiber = self.id, "leaking fiber that is still parked");
            return;
        }
        // SAFETY: dropped exactly once, here.
        unsafe { ManuallyDrop::drop(self.coroutine.get_mut()) };
    }
}

/// Copyable reference to a fiber owned by a [`FiberPool`](crate::fiber_pool::FiberPool).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiberHandle(NonNull<Fiber>);

// SAFETY: see `Fiber`.
unsafe impl Send for FiberHandle {}
unsafe impl Sync for FiberHandle {}

impl FiberHandle {
    pub(crate) fn new(fiber: &Fiber) -> Self {
        FiberHandle(NonNull::from(fiber))
    }

    pub(crate) fn from_ptr(ptr: *mut Fiber) -> Option<Self> {
        NonNull::new(ptr).map(FiberHandle)
    }

    pub(crate) fn as_ptr(self) -> *mut Fiber {
        self.0.as_ptr()
    }

    pub(crate) fn fiber<'a>(self) -> &'a Fiber {
        // SAFETY: handles only come from a live pool, and the pool outlives
        // every worker and waiter that can hold one.
        unsafe { self.0.as_ref() }
    }
}

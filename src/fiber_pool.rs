use crate::context;
use crate::error::SchedulerError;
use crate::fiber::{Fiber, FiberHandle};
use parking_lot::Mutex;

/// Fixed-capacity pool of idle fibers shared by every job worker.
///
/// Idle fibers are handed out last-released, first-acquired, so a recently
/// used (cache-warm) stack is preferred. The pool never grows: acquiring from
/// an empty pool or releasing into a full one is a fatal error.
pub struct FiberPool {
    fibers: Box<[Fiber]>,
    idle: Mutex<Vec<FiberHandle>>,
}

impl FiberPool {
    /// Creates `capacity` fibers running the job loop, all idle.
    pub fn new(capacity: usize, stack_size: usize) -> Result<Self, SchedulerError> {
        let fibers = (0..capacity)
            .map(|id| Fiber::new(id, stack_size, context::fiber_main))
            .collect::<Result<Vec<_>, _>>()
            .map_err(SchedulerError::FiberStack)?
            .into_boxed_slice();
        // Reversed so the first acquire hands out fiber 0.
        let idle = fibers.iter().rev().map(FiberHandle::new).collect();
        Ok(FiberPool {
            fibers,
            idle: Mutex::new(idle),
        })
    }

    /// Takes an idle fiber.
    ///
    /// # Panics
    ///
    /// Panics when every fiber is in use.
    pub fn acquire(&self) -> FiberHandle {
        let mut idle = self.idle.lock();
        match idle.pop() {
            Some(fiber) => fiber,
            None => fatal!("fiber pool exhausted ({} fibers)", self.fibers.len()),
        }
    }

    /// Returns a fiber to the idle list.
    ///
    /// # Panics
    ///
    /// Panics if the pool is already full.
    pub fn release(&self, fiber: FiberHandle) {
        let mut idle = self.idle.lock();
        if idle.len() >= self.fibers.len() {
            fatal!("fiber pool overflow");
        }
        debug_assert!(!idle.contains(&fiber), "fiber released twice");
        idle.push(fiber);
    }

    pub fn capacity(&self) -> usize {
        self.fibers.len()
    }

    /// Number of fibers currently idle.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Lets every idle fiber return from its job loop. Must only be called
    /// once no worker can acquire fibers anymore.
    pub(crate) fn finish_idle(&self) {
        let idle = self.idle.lock();
        for fiber in idle.iter() {
            fiber.fiber().finish();
        }
    }
}

impl Drop for FiberPool {
    fn drop(&mut self) {
        self.finish_idle();
    }
}

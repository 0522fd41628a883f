//! Blocking multi-producer multi-consumer work queues.
//!
//! An empty slot (`None`) is the shutdown sentinel: each worker stops after
//! consuming exactly one.

use crossbeam::channel::{self, Receiver, Sender};

pub struct WorkQueue<T> {
    name: &'static str,
    sender: Sender<Option<T>>,
    receiver: Receiver<Option<T>>,
}

impl<T> WorkQueue<T> {
    pub fn new(name: &'static str) -> Self {
        let (sender, receiver) = channel::unbounded();
        WorkQueue {
            name,
            sender,
            receiver,
        }
    }

    /// Enqueues one item. Failure to enqueue is fatal.
    pub fn push(&self, item: T) {
        self.send(Some(item));
    }

    /// Enqueues one shutdown sentinel.
    pub fn push_sentinel(&self) {
        self.send(None);
    }

    fn send(&self, slot: Option<T>) {
        // The queue owns a receiver, so the channel cannot be disconnected.
        if self.sender.send(slot).is_err() {
            fatal!("failed to enqueue into the {} queue", self.name);
        }
    }

    /// Blocks until an item is available. `None` means shut down.
    pub fn pop(&self) -> Option<T> {
        self.receiver.recv().ok().flatten()
    }

    /// Approximate number of queued items, sentinels included.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

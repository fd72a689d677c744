//! Send queue
//!
//! Unbounded FIFO between any number of producers and the single writer
//! thread. One mutex, one condvar; the `closed` flag lets shutdown wake a
//! blocked consumer with an explicit "closed" answer instead of a value.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

use crate::pool::BufferHandle;

struct QueueState {
    items: VecDeque<BufferHandle>,
    closed: bool,
}

/// FIFO of buffers waiting for transmission
pub struct SendQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append a buffer and wake the consumer.
    ///
    /// A closed queue hands the buffer back.
    pub fn enqueue(&self, handle: BufferHandle) -> Result<(), BufferHandle> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(handle);
            }
            state.items.push_back(handle);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Block until a buffer is available or the queue is closed.
    ///
    /// Returns `None` once closed, even if buffers are still queued.
    pub fn dequeue_blocking(&self) -> Option<BufferHandle> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(handle) = state.items.pop_front() {
                return Some(handle);
            }
            // Spurious wakeups land back here
            self.ready.wait(&mut state);
        }
    }

    /// Refuse new buffers and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Accept buffers again after a `close`
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    /// Drop every queued buffer, releasing their blocks. Returns how many.
    pub fn drain(&self) -> usize {
        let drained: Vec<BufferHandle> = self.state.lock().items.drain(..).collect();
        // Blocks are released outside the lock
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

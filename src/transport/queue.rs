//! Bounded hand-off queue between the network callback context and a
//! consumer.
//!
//! A ring buffer behind one mutex with two condition variables. Marking the
//! queue done releases every blocked producer and consumer; it stays done
//! until [`HandoffQueue::reset`].

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};

use crate::core::constants::HANDOFF_QUEUE_CAPACITY;

struct QueueState<T> {
    items: VecDeque<T>,
    done: bool,
}

/// Capacity-limited FIFO with cooperative shutdown.
pub struct HandoffQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new(HANDOFF_QUEUE_CAPACITY)
    }
}

impl<T> HandoffQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                done: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append an item, blocking while the queue is full.
    ///
    /// If the queue is (or becomes) done, returns without enqueuing.
    pub fn put(&self, item: T) {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.done {
            self.not_full.wait(&mut state);
        }
        if state.done {
            return;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Once done, remaining items are still drained; `None` means done and
    /// empty.
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.done {
            self.not_empty.wait(&mut state);
        }
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Remove the oldest item without blocking.
    pub fn try_take(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Mark the queue done and wake every waiter. Idempotent.
    pub fn done(&self) {
        let mut state = self.state.lock();
        state.done = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Check if the queue has been marked done.
    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    /// Clear contents and the done mark, waking every waiter.
    ///
    /// Only call once the owning connection has fully closed.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.done = false;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> HandoffQueue<T> {
    /// Copy of the oldest item, blocking while the queue is empty.
    ///
    /// `None` means done and empty.
    pub fn peek(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.done {
            self.not_empty.wait(&mut state);
        }
        state.items.front().cloned()
    }

    /// Copy of the oldest item without blocking.
    pub fn try_peek(&self) -> Option<T> {
        self.state.lock().items.front().cloned()
    }
}

impl<T> fmt::Debug for HandoffQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandoffQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.items.len())
            .field("done", &state.done)
            .finish()
    }
}

//! Thread-safe double-ended queue
//!
//! A `VecDeque` behind a single `parking_lot::Mutex`. Used for every
//! connection's outbound queue and for the inbound queue shared by all
//! connections of a server.
//!
//! ## Semantics
//! - Every operation holds the lock only for the duration of one structural
//!   read or mutation.
//! - Nothing ever waits for items to arrive. Consumers poll (see
//!   `Server::update`), they are never woken.
//! - Popping or peeking an empty queue yields `None`; callers that need the
//!   element must check `is_empty()` or handle `None`.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Mutex-guarded deque
#[derive(Debug)]
pub struct ThreadSafeQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> ThreadSafeQueue<T> {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_back(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    pub fn push_front(&self, item: T) {
        self.inner.lock().push_front(item);
    }

    /// Push to the back and return the queue length after the push
    ///
    /// A result of `1` means the queue was empty before this call, which is
    /// how a write pipeline knows it must be woken.
    pub fn push_back_len(&self, item: T) -> usize {
        let mut deque = self.inner.lock();
        deque.push_back(item);
        deque.len()
    }

    pub fn pop_front(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.inner.lock().pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of queued items
    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Pop up to `max` items from the front in one lock acquisition
    pub fn drain_up_to(&self, max: usize) -> Vec<T> {
        let mut deque = self.inner.lock();
        let n = max.min(deque.len());
        deque.drain(..n).collect()
    }
}

impl<T: Clone> ThreadSafeQueue<T> {
    /// Clone of the front element
    pub fn front(&self) -> Option<T> {
        self.inner.lock().front().cloned()
    }

    /// Clone of the back element
    pub fn back(&self) -> Option<T> {
        self.inner.lock().back().cloned()
    }

    /// Point-in-time copy of the contents, front to back
    ///
    /// The lock is released before the copy is returned, so the iteration
    /// itself never blocks producers.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Iterate over a snapshot of the contents
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.snapshot().into_iter()
    }
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for ThreadSafeQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            inner: Mutex::new(iter.into_iter().collect()),
        }
    }
}

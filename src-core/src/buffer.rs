//! Fixed-capacity ring buffers shared between capture threads and the
//! export pipeline.
//!
//! A `RingBuffer` is a `Mutex<VecDeque>` with FIFO eviction: once full,
//! every push drops the oldest element. Readers never hold the lock for
//! long; `snapshot_tail` copies the requested window out under the lock
//! and releases it before any encoding work starts.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded FIFO buffer. `push` evicts the oldest element when full.
pub struct RingBuffer<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` elements.
    /// A zero capacity is clamped to 1 so `push` always retains something.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an element, evicting the oldest if the buffer is full.
    pub fn push(&self, item: T) {
        let mut queue = self.lock();
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(item);
    }

    /// Number of elements currently buffered.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of elements this buffer retains.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all buffered elements.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        // A poisoned mutex only means a capture thread panicked mid-push;
        // the queue itself is still structurally valid.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy out the newest `count` elements, oldest first.
    ///
    /// Returns fewer than `count` elements when the buffer holds fewer.
    /// The lock is released before the copies are returned, so writers
    /// are only blocked for the duration of the clone.
    pub fn snapshot_tail(&self, count: usize) -> Vec<T> {
        let queue = self.lock();
        let take = count.min(queue.len());
        let skip = queue.len() - take;
        queue.iter().skip(skip).cloned().collect()
    }

    /// Copy out the entire buffer contents, oldest first.
    pub fn snapshot_all(&self) -> Vec<T> {
        let queue = self.lock();
        queue.iter().cloned().collect()
    }
}

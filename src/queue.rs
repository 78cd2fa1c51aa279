//! Fixed-capacity blocking FIFO shared by the acceptor and the workers.
//!
//! Producers block while the queue is full and consumers block while it is
//! empty. Every wait re-checks its predicate after waking, so spurious wakeups
//! and lost races with other consumers are harmless.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::{KvError, Result};

/// Returned by [`BoundedQueue::enqueue`] once the queue is closed.
///
/// Carries the rejected item back to the caller.
#[derive(Error, Debug)]
#[error("queue is closed")]
pub struct Closed<T>(pub T);

/// A bounded blocking FIFO built on one mutex and two condition variables.
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Circular buffer state; only ever touched with the mutex held.
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    len: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            len: 0,
            closed: false,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn push(&mut self, item: T) {
        debug_assert!(!self.is_full());
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.len += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Config`] if `capacity` is below 2.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(KvError::Config(format!(
                "queue capacity must be at least 2, got {capacity}"
            )));
        }
        Ok(Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `item` at the tail, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Hands the item back inside [`Closed`] if the queue is closed before a slot
    /// frees up.
    pub fn enqueue(&self, item: T) -> std::result::Result<(), Closed<T>> {
        let mut ring = self.lock();
        while ring.is_full() && !ring.closed {
            ring = self
                .not_full
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if ring.closed {
            return Err(Closed(item));
        }
        ring.push(item);
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the item at the head, blocking while the queue is empty.
    ///
    /// Items still queued when the queue is closed are handed out first; `None`
    /// means the queue is closed and empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut ring = self.lock();
        while ring.len == 0 && !ring.closed {
            ring = self
                .not_empty
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let item = ring.pop();
        drop(ring);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Closes the queue and wakes every blocked producer and consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Removes and returns everything still queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut ring = self.lock();
        let mut items = Vec::with_capacity(ring.len);
        while let Some(item) = ring.pop() {
            items.push(item);
        }
        drop(ring);
        self.not_full.notify_all();
        items
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Fixed number of slots.
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_wrap_at_true_capacity() {
        let mut ring = Ring::with_capacity(3);
        for round in 0..5 {
            ring.push(round * 10);
            ring.push(round * 10 + 1);
            assert!(ring.head < 3 && ring.tail < 3);
            assert_eq!(ring.pop(), Some(round * 10));
            assert_eq!(ring.pop(), Some(round * 10 + 1));
            assert_eq!(ring.len, 0);
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn full_ring_reports_full() {
        let mut ring = Ring::with_capacity(2);
        ring.push('a');
        ring.push('b');
        assert!(ring.is_full());
        assert_eq!(ring.head, ring.tail);
        assert_eq!(ring.pop(), Some('a'));
        assert!(!ring.is_full());
    }
}

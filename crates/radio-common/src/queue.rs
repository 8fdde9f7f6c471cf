//! Bounded async priority queue.
//!
//! Items leave highest priority first; equal priorities leave in arrival
//! order. Producers wait when the queue is full, consumers wait when it is
//! empty, and [`PriorityQueue::close`] wakes everybody: pending and future
//! pushes fail, pops drain what is left and then return `None`.

use crate::message::{Prioritized, Stamped};
use std::collections::BinaryHeap;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{Notify, Semaphore, TryAcquireError};

/// Why an item was not queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed.
    #[error("queue closed")]
    Closed,
    /// The queue is at capacity (non-waiting push only).
    #[error("queue full")]
    Full,
}

struct Inner<T> {
    heap: BinaryHeap<Stamped<T>>,
    next_seq: u64,
    closed: bool,
}

/// Multi-producer priority queue with a fixed capacity.
pub struct PriorityQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Notify,
    slots: Semaphore,
    capacity: usize,
}

impl<T: Prioritized> PriorityQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Notify::new(),
            slots: Semaphore::new(capacity),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, item: T) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if inner.closed {
            drop(inner);
            self.slots.add_permits(1);
            return Err(QueueError::Closed);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Stamped {
            priority: item.priority(),
            seq,
            item,
        });
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Queues `item`, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue is or becomes closed.
    pub async fn push(&self, item: T) -> Result<(), QueueError> {
        self.slots
            .acquire()
            .await
            .map_err(|_| QueueError::Closed)?
            .forget();
        self.insert(item)
    }

    /// Queues `item` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] at capacity and [`QueueError::Closed`]
    /// after [`Self::close`].
    pub fn try_push(&self, item: T) -> Result<(), QueueError> {
        match self.slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => return Err(QueueError::Full),
            Err(TryAcquireError::Closed) => return Err(QueueError::Closed),
        }
        self.insert(item)
    }

    /// Takes the most urgent item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if let Some(stamped) = inner.heap.pop() {
                    drop(inner);
                    self.slots.add_permits(1);
                    return Some(stamped.item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.slots.close();
        self.available.notify_waiters();
    }

    /// Whether [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

//! Bounded hand-off queue between the inbound and outbound halves.
//!
//! Producers never block: when the queue is full the **oldest** entry is
//! evicted to make room.  Everything that crosses this queue (retransmission
//! requests, peer REQUEST ranges) is idempotent and re-issued by the gap
//! debounce, so losing the oldest entry only delays recovery.
//!
//! The consumer drains everything queued at the moment of the call with
//! [`ExchangeQueue::drain`] and never waits for more.  Both halves reach the
//! queue through the engine's shared state, which is already reference
//! counted.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Bounded FIFO shared by reference between two threads.
#[derive(Debug)]
pub struct ExchangeQueue<T> {
    inner: Mutex<QueueInner<T>>,
}

#[derive(Debug)]
struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: usize,
    // Metrics
    evictions: u64,
}

impl<T> ExchangeQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                evictions: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        // Poisoning is ignored: no operation leaves the deque half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue `item`, evicting the oldest entry if the queue is full.
    ///
    /// Returns `true` when an entry was evicted.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.lock();
        let evicted = if inner.items.len() >= inner.capacity {
            inner.items.pop_front();
            inner.evictions += 1;
            true
        } else {
            false
        };
        inner.items.push_back(item);
        evicted
    }

    /// Take every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Total entries evicted since creation.
    pub fn evictions(&self) -> u64 {
        self.lock().evictions
    }
}

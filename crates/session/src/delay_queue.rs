//! A time-ordered blocking queue.
//!
//! Elements are pushed with a delay and become visible to consumers only
//! once `push time + delay` has elapsed. Ordering is by ready-time only;
//! FIFO among equal ready-times is not guaranteed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::lock;

pub struct DelayQueue<T> {
    heap: Mutex<BinaryHeap<Delayed<T>>>,
    available: Condvar,
}

struct Delayed<T> {
    ready_at: Instant,
    value: T,
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}

impl<T> Eq for Delayed<T> {}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Delayed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; the earliest ready-time must rank
        // greatest.
        other.ready_at.cmp(&self.ready_at)
    }
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
        }
    }

    /// Inserts `value`, eligible once `delay` has elapsed. Wakes one waiter
    /// iff the queue was empty or the new element precedes the current head.
    pub fn push(&self, value: T, delay: Duration) {
        let entry = Delayed {
            ready_at: Instant::now() + delay,
            value,
        };
        let mut heap = lock(&self.heap);
        let precedes_head = heap
            .peek()
            .map_or(true, |head| entry.ready_at < head.ready_at);
        heap.push(entry);
        if precedes_head {
            self.available.notify_one();
        }
    }

    /// Non-blocking pop: `None` if the queue is empty or the head is not yet
    /// eligible.
    pub fn pop(&self) -> Option<T> {
        let mut heap = lock(&self.heap);
        if heap.peek()?.ready_at > Instant::now() {
            return None;
        }
        let entry = heap.pop()?;
        if !heap.is_empty() {
            self.available.notify_one();
        }
        Some(entry.value)
    }

    /// Blocks until an eligible element is available and returns it. The
    /// wait is bounded by `max_idle`, after which `None` is returned; callers
    /// polling for shutdown rely on this.
    pub fn pop_wait(&self, max_idle: Duration) -> Option<T> {
        let deadline = Instant::now() + max_idle;
        let mut heap = lock(&self.heap);
        loop {
            let now = Instant::now();
            let head_ready_at = heap.peek().map(|head| head.ready_at);
            let wake_at = match head_ready_at {
                Some(ready_at) if ready_at <= now => {
                    let entry = heap.pop()?;
                    if !heap.is_empty() {
                        self.available.notify_one();
                    }
                    return Some(entry.value);
                }
                Some(ready_at) => ready_at.min(deadline),
                None => deadline,
            };
            if wake_at <= now {
                return None;
            }
            let (guard, _timed_out) = self
                .available
                .wait_timeout(heap, wake_at - now)
                .unwrap_or_else(PoisonError::into_inner);
            heap = guard;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.heap).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.heap).is_empty()
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

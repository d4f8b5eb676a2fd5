// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Channel, POLL_INTERVAL};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

/// Unbounded MPMC queue with blocking pop.
///
/// `push` always succeeds and wakes one blocked popper. `pop` blocks while
/// the queue is empty and running; after [`notify_stop`](LinkedQueue::notify_stop)
/// it returns `None` without draining, leaving leftovers to
/// [`pop_now`](LinkedQueue::pop_now).
pub struct LinkedQueue<T> {
    inner: Mutex<Inner<T>>,
    nonempty: Condvar,
}

struct Inner<T> {
    queue: VecDeque<T>,
    running: bool,
}

impl<T> LinkedQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                running: true,
            }),
            nonempty: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a value and wake one blocked popper.
    pub fn push(&self, val: T) {
        let mut inner = self.lock();
        inner.queue.push_back(val);
        drop(inner);
        self.nonempty.notify_one();
    }

    /// Dequeue, blocking while the queue is empty and running.
    ///
    /// Returns `None` once the queue was stopped.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.lock();
        while inner.queue.is_empty() && inner.running {
            let (guard, _) = self
                .nonempty
                .wait_timeout(inner, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
        if inner.running {
            inner.queue.pop_front()
        } else {
            None
        }
    }

    /// Dequeue without blocking; `None` when empty.
    pub fn pop_now(&self) -> Option<T> {
        self.lock().queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Yield the calling thread until the queue is observed empty.
    ///
    /// Shutdown-path helper; the busy yield is intentional.
    pub fn block_till_empty(&self) {
        while !self.is_empty() {
            thread::yield_now();
        }
    }

    /// Stop the queue and wake every blocked popper.
    pub fn notify_stop(&self) {
        let mut inner = self.lock();
        inner.running = false;
        log::trace!("linked queue stopped with {} elements", inner.queue.len());
        drop(inner);
        self.nonempty.notify_all();
    }
}

impl<T: Clone> LinkedQueue<T> {
    /// Snapshot of the front element.
    pub fn front(&self) -> Option<T> {
        self.lock().queue.front().cloned()
    }

    /// Snapshot of the back element.
    pub fn back(&self) -> Option<T> {
        self.lock().queue.back().cloned()
    }
}

impl<T> Default for LinkedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Channel<T> for LinkedQueue<T> {
    fn push(&self, val: T) -> bool {
        LinkedQueue::push(self, val);
        true
    }

    fn push_now(&self, val: T) -> bool {
        LinkedQueue::push(self, val);
        true
    }

    fn try_push(&self, val: T) -> Result<(), T> {
        LinkedQueue::push(self, val);
        Ok(())
    }

    fn pop(&self) -> Option<T> {
        LinkedQueue::pop(self)
    }

    fn pop_now(&self) -> Option<T> {
        LinkedQueue::pop_now(self)
    }

    fn len(&self) -> usize {
        LinkedQueue::len(self)
    }

    fn is_empty(&self) -> bool {
        LinkedQueue::is_empty(self)
    }

    fn block_till_empty(&self) {
        LinkedQueue::block_till_empty(self);
    }

    fn notify_stop(&self) {
        LinkedQueue::notify_stop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let queue = LinkedQueue::new();
        for i in 0..16 {
            queue.push(i);
        }
        assert_eq!(queue.front(), Some(0));
        assert_eq!(queue.back(), Some(15));
        for i in 0..16 {
            assert_eq!(queue.pop_now(), Some(i));
        }
        assert_eq!(queue.pop_now(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(LinkedQueue::new());

        let popper = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop())
        };

        std::thread::sleep(Duration::from_millis(10));
        queue.push(7u32);
        assert_eq!(popper.join().unwrap(), Some(7));
    }

    #[test]
    fn notify_stop_unblocks_poppers() {
        let queue: Arc<LinkedQueue<u32>> = Arc::new(LinkedQueue::new());

        let poppers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.pop())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(10));
        queue.notify_stop();
        for popper in poppers {
            assert_eq!(popper.join().unwrap(), None);
        }
    }

    #[test]
    fn stopped_queue_still_drains_with_pop_now() {
        let queue = LinkedQueue::new();
        queue.push(1);
        queue.push(2);
        queue.notify_stop();

        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop_now(), Some(1));
        assert_eq!(queue.pop_now(), Some(2));
        assert_eq!(queue.pop_now(), None);
    }
}

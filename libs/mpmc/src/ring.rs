// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Channel, POLL_INTERVAL};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

/// Bounded MPMC ring queue.
///
/// The ring is addressed through two monotonically increasing 64-bit
/// indices; the slot for an index is `index % capacity` and the fill level
/// is `back - front`. Both indices are only advanced under the storage
/// mutex, but they can be read without it, which makes
/// [`len`](RingQueue::len) and [`is_empty`](RingQueue::is_empty) cheap
/// snapshots that may be transiently off by one while an operation is in
/// flight. Only [`pop_now`](RingQueue::pop_now) returning `None` is an
/// authoritative "empty".
pub struct RingQueue<T> {
    slots: Mutex<Box<[Option<T>]>>,
    front: AtomicU64,
    back: AtomicU64,
    capacity: u64,
    nonempty: Condvar,
    nonfull: Condvar,
    running: AtomicBool,
}

impl<T> RingQueue<T> {
    /// Create a ring with room for `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring queue capacity must be non-zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots.into_boxed_slice()),
            front: AtomicU64::new(0),
            back: AtomicU64::new(0),
            capacity: capacity as u64,
            nonempty: Condvar::new(),
            nonfull: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<[Option<T>]>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, index: u64) -> usize {
        (index % self.capacity) as usize
    }

    /// Enqueue without blocking. Returns `false` when the ring is full, in
    /// which case the value is dropped; use
    /// [`try_push`](RingQueue::try_push) to keep it.
    pub fn push_now(&self, val: T) -> bool {
        self.try_push(val).is_ok()
    }

    /// Enqueue without blocking, handing the value back when the ring is
    /// full.
    pub fn try_push(&self, val: T) -> Result<(), T> {
        let mut slots = self.lock();
        if self.back.load(Ordering::Relaxed) - self.front.load(Ordering::Relaxed) < self.capacity {
            let back = self.back.fetch_add(1, Ordering::Release);
            slots[self.slot(back)] = Some(val);
            drop(slots);
            self.nonempty.notify_one();
            Ok(())
        } else {
            Err(val)
        }
    }

    /// Enqueue, blocking while the ring is full and running.
    ///
    /// Returns `false` once the ring was stopped.
    pub fn push(&self, val: T) -> bool {
        let mut slots = self.lock();
        while self.back.load(Ordering::Relaxed) - self.front.load(Ordering::Relaxed)
            == self.capacity
            && self.running.load(Ordering::Relaxed)
        {
            let (guard, _) = self
                .nonfull
                .wait_timeout(slots, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            slots = guard;
        }
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }
        let back = self.back.fetch_add(1, Ordering::Release);
        slots[self.slot(back)] = Some(val);
        drop(slots);
        self.nonempty.notify_one();
        true
    }

    /// Dequeue without blocking; `None` when the ring is empty.
    pub fn pop_now(&self) -> Option<T> {
        let mut slots = self.lock();
        if self.back.load(Ordering::Relaxed) != self.front.load(Ordering::Relaxed) {
            let front = self.front.fetch_add(1, Ordering::Release);
            let val = slots[self.slot(front)].take();
            debug_assert!(val.is_some(), "occupied ring slot was empty");
            drop(slots);
            self.nonfull.notify_one();
            val
        } else {
            None
        }
    }

    /// Dequeue, blocking while the ring is empty and running.
    ///
    /// Returns `None` once the ring was stopped; leftovers drain with
    /// [`pop_now`](RingQueue::pop_now).
    pub fn pop(&self) -> Option<T> {
        let mut slots = self.lock();
        while self.back.load(Ordering::Relaxed) == self.front.load(Ordering::Relaxed)
            && self.running.load(Ordering::Relaxed)
        {
            let (guard, _) = self
                .nonempty
                .wait_timeout(slots, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            slots = guard;
        }
        if !self.running.load(Ordering::Relaxed) {
            return None;
        }
        let front = self.front.fetch_add(1, Ordering::Release);
        let val = slots[self.slot(front)].take();
        debug_assert!(val.is_some(), "occupied ring slot was empty");
        drop(slots);
        self.nonfull.notify_one();
        val
    }

    /// Fill-level snapshot; may be transiently off by one.
    pub fn len(&self) -> usize {
        let back = self.back.load(Ordering::Acquire);
        let front = self.front.load(Ordering::Acquire);
        back.saturating_sub(front) as usize
    }

    /// Emptiness snapshot; same caveat as [`len`](RingQueue::len).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Yield the calling thread until the ring is observed empty.
    ///
    /// Shutdown-path helper; the busy yield is intentional.
    pub fn block_till_empty(&self) {
        while !self.is_empty() {
            thread::yield_now();
        }
    }

    /// Stop the ring and wake everything blocked on either end.
    pub fn notify_stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        log::trace!("ring queue stopped with {} elements", self.len());
        self.nonempty.notify_all();
        self.nonfull.notify_all();
    }
}

impl<T: Clone> RingQueue<T> {
    /// Snapshot of the front element.
    pub fn front(&self) -> Option<T> {
        let slots = self.lock();
        let front = self.front.load(Ordering::Relaxed);
        if front != self.back.load(Ordering::Relaxed) {
            slots[self.slot(front)].clone()
        } else {
            None
        }
    }

    /// Snapshot of the back element.
    pub fn back(&self) -> Option<T> {
        let slots = self.lock();
        let back = self.back.load(Ordering::Relaxed);
        if self.front.load(Ordering::Relaxed) != back {
            slots[self.slot(back - 1)].clone()
        } else {
            None
        }
    }
}

impl<T: Send> Channel<T> for RingQueue<T> {
    fn push(&self, val: T) -> bool {
        RingQueue::push(self, val)
    }

    fn push_now(&self, val: T) -> bool {
        RingQueue::push_now(self, val)
    }

    fn try_push(&self, val: T) -> Result<(), T> {
        RingQueue::try_push(self, val)
    }

    fn pop(&self) -> Option<T> {
        RingQueue::pop(self)
    }

    fn pop_now(&self) -> Option<T> {
        RingQueue::pop_now(self)
    }

    fn len(&self) -> usize {
        RingQueue::len(self)
    }

    fn is_empty(&self) -> bool {
        RingQueue::is_empty(self)
    }

    fn block_till_empty(&self) {
        RingQueue::block_till_empty(self);
    }

    fn notify_stop(&self) {
        RingQueue::notify_stop(self);
    }
}

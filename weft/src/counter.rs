// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::fiber::FiberId;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fixed table of sync counters.
///
/// A slot is an integer rendezvous: fibers enqueue themselves as waiters,
/// and the decrement that takes the value to zero (or below) releases every
/// waiter present at that moment in one critical section. The counter
/// itself uses relaxed atomics; publication of the released fibers happens
/// through the queues they are released into.
pub(crate) struct CounterTable {
    slots: Box<[CounterSlot]>,
}

struct CounterSlot {
    value: AtomicI64,
    waiters: Mutex<Vec<FiberId>>,
}

impl CounterTable {
    pub(crate) fn new(count: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, || CounterSlot {
            value: AtomicI64::new(0),
            waiters: Mutex::new(Vec::new()),
        });
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn waiters(&self, index: usize) -> MutexGuard<'_, Vec<FiberId>> {
        self.slots[index]
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `fiber` as a waiter on slot `index`.
    ///
    /// Must happen before the matching increments so no decrement can cross
    /// zero while the registration is still in flight.
    pub(crate) fn add_waiter(&self, index: usize, fiber: FiberId) {
        self.waiters(index).push(fiber);
    }

    /// Add `n` to slot `index` and return the post-add value.
    pub(crate) fn increment(&self, index: usize, n: i64) -> i64 {
        self.slots[index].value.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Subtract `n` from slot `index` and return the post-subtract value.
    ///
    /// On a zero crossing every waiter is drained through `wake` while the
    /// slot's waiter list is locked. Decrementing below zero is benign: the
    /// list is already empty, so the release is idempotent.
    pub(crate) fn decrement(&self, index: usize, n: i64, mut wake: impl FnMut(FiberId)) -> i64 {
        let value = self.slots[index].value.fetch_sub(n, Ordering::Relaxed) - n;
        if value <= 0 {
            let mut waiters = self.waiters(index);
            for fiber in waiters.drain(..) {
                wake(fiber);
            }
        }
        value
    }

    /// Current value of slot `index`.
    pub(crate) fn value(&self, index: usize) -> i64 {
        self.slots[index].value.load(Ordering::Relaxed)
    }

    /// Release every waiter in every slot. Shutdown path.
    pub(crate) fn drain_all(&self, mut wake: impl FnMut(FiberId)) {
        for index in 0..self.slots.len() {
            let mut waiters = self.waiters(index);
            for fiber in waiters.drain(..) {
                wake(fiber);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber(id: u32) -> FiberId {
        FiberId(id)
    }

    #[test]
    fn releases_all_waiters_on_zero_crossing() {
        let table = CounterTable::new(4);
        table.add_waiter(1, fiber(7));
        table.add_waiter(1, fiber(9));
        assert_eq!(table.increment(1, 2), 2);

        let mut woken = Vec::new();
        assert_eq!(table.decrement(1, 1, |id| woken.push(id)), 1);
        assert!(woken.is_empty());

        assert_eq!(table.decrement(1, 1, |id| woken.push(id)), 0);
        assert_eq!(woken, vec![fiber(7), fiber(9)]);
    }

    #[test]
    fn over_decrement_is_idempotent() {
        let table = CounterTable::new(1);
        table.add_waiter(0, fiber(3));
        table.increment(0, 1);

        let mut woken = Vec::new();
        assert_eq!(table.decrement(0, 1, |id| woken.push(id)), 0);
        assert_eq!(woken.len(), 1);

        // Further decrements find an empty waiter list.
        assert_eq!(table.decrement(0, 1, |id| woken.push(id)), -1);
        assert_eq!(woken.len(), 1);
        assert_eq!(table.value(0), -1);
    }

    #[test]
    fn waiters_added_after_release_wait_for_the_next_crossing() {
        let table = CounterTable::new(1);
        table.increment(0, 1);
        table.decrement(0, 1, |_| {});

        table.add_waiter(0, fiber(5));
        assert_eq!(table.increment(0, 2), 2);

        let mut woken = Vec::new();
        table.decrement(0, 2, |id| woken.push(id));
        assert_eq!(woken, vec![fiber(5)]);
    }

    #[test]
    #[should_panic]
    fn out_of_range_index_panics() {
        CounterTable::new(2).increment(2, 1);
    }
}

//! Multi-producer/multi-consumer queues for the weft runtime.
//!
//! Two variants with a shared surface:
//!
//! - [`LinkedQueue`]: unbounded, `push` always succeeds, blocking `pop`.
//! - [`RingQueue`]: bounded ring with full/empty backpressure and both
//!   blocking and non-blocking operations on each end.
//!
//! Both are plain mutex-and-condvar queues. Blocking operations never park
//! indefinitely: they wait in slices of [`POLL_INTERVAL`] so a concurrent
//! [`notify_stop`](Channel::notify_stop) is observed in bounded time even if
//! the condvar signal itself is lost.
//!
//! The [`Channel`] trait abstracts over the two variants where a consumer
//! (notably the task queue of the worker pool) is configured with either.

mod linked;
mod ring;

use std::time::Duration;

pub use linked::LinkedQueue;
pub use ring::RingQueue;

/// Upper bound on a single blocking wait slice.
///
/// Keeping this short bounds the reaction time to a stop notification.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Common surface of the two queue variants.
///
/// Object-safe so a queue chosen at configuration time can live behind a
/// `Box<dyn Channel<T>>`.
pub trait Channel<T>: Send + Sync {
    /// Enqueue, blocking while the queue is full.
    ///
    /// Returns `false` only when the queue was stopped. The unbounded
    /// variant never blocks and never fails.
    fn push(&self, val: T) -> bool;

    /// Enqueue without blocking. Returns `false` when the queue is full,
    /// in which case the value is dropped; use
    /// [`try_push`](Channel::try_push) to keep it.
    fn push_now(&self, val: T) -> bool;

    /// Enqueue without blocking, handing the value back when the queue is
    /// full.
    fn try_push(&self, val: T) -> Result<(), T>;

    /// Dequeue, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue was stopped; remaining elements are
    /// drained with [`pop_now`](Channel::pop_now).
    fn pop(&self) -> Option<T>;

    /// Dequeue without blocking. `None` means the queue was observed empty,
    /// and this is the only authoritative emptiness check.
    fn pop_now(&self) -> Option<T>;

    /// Number of queued elements. For the bounded variant this is a
    /// lock-free snapshot that can be transiently off by one.
    fn len(&self) -> usize;

    /// Whether the queue is empty. Same caveat as [`len`](Channel::len).
    fn is_empty(&self) -> bool;

    /// Spin (yielding the thread) until the queue is observed empty.
    fn block_till_empty(&self);

    /// Stop the queue: all current and future blocking operations return
    /// `false`/`None` in bounded time.
    fn notify_stop(&self);
}

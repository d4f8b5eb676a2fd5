// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stackful fibers and the surface tasks see while running on one.
//!
//! A [`FiberRunner`] wraps a [`corosensei`] coroutine whose body is a small
//! trampoline: take the staged task, run it, suspend back to the resuming
//! worker, repeat until stopped. Suspending structurally returns control to
//! the most recent resumer, so a fiber always comes back to the exact
//! worker that switched into it, no matter which worker that is.

use crate::error::InitError;
use crate::pool::Shared;
use crate::task::Task;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Stable identity of a fiber across queues and waiter lists.
///
/// Fibers live in an arena created at pool init, so the id doubles as the
/// index into the pool's registration set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FiberId(pub(crate) u32);

impl FiberId {
    /// Index into the pool's registration set.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a fiber, readable from any thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Created, never armed with a task.
    Uninit = 0,
    /// Between tasks (armed or not).
    Idle = 1,
    /// Inside a task. Observed after a resume returns, this means the fiber
    /// yielded mid-task and is waiting somewhere.
    Running = 2,
}

impl FiberState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => FiberState::Uninit,
            1 => FiberState::Idle,
            2 => FiberState::Running,
            _ => unreachable!("invalid fiber state {raw}"),
        }
    }
}

/// Shared control block of a fiber.
///
/// Queues and waiter lists move the [`FiberRunner`] value itself; the
/// control block is the part that stays reachable from the pool's
/// registration set so shutdown can broadcast a stop to every fiber
/// regardless of where its runner currently sits.
pub(crate) struct FiberCtrl {
    id: FiberId,
    state: AtomicU8,
    running: AtomicBool,
    staged: Mutex<Option<Task>>,
}

impl FiberCtrl {
    fn new(id: FiberId) -> Self {
        Self {
            id,
            state: AtomicU8::new(FiberState::Uninit as u8),
            running: AtomicBool::new(true),
            staged: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: FiberState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the trampoline to exit at its next boundary.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn stage(&self, task: Task) {
        let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(staged.is_none(), "fiber {} armed twice", self.id);
        *staged = Some(task);
    }

    fn take_staged(&self) -> Option<Task> {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A reusable stackful execution context.
///
/// The runner value is owned by exactly one place at a time: the idle
/// queue, the awake queue, a worker's stack, or the pool's park table.
/// That single-owner discipline is what makes it safe to resume the fiber
/// from whichever worker happens to hold it.
pub struct FiberRunner {
    ctrl: Arc<FiberCtrl>,
    co: Coroutine<(), (), ()>,
}

// Safety: the coroutine's closure only captures `Send` state (the control
// block and the pool's shared state), and staged tasks are `Send` by
// construction. What cannot be checked here is stack contents while the
// fiber is suspended mid-task: holding a `!Send` value across a yield and
// resuming on another thread would be unsound, which is documented as a
// contract of the yield operations.
unsafe impl Send for FiberRunner {}

impl FiberRunner {
    pub(crate) fn new(
        id: FiberId,
        stack_size: usize,
        shared: Arc<Shared>,
    ) -> Result<Self, InitError> {
        let stack = DefaultStack::new(stack_size).map_err(InitError::Stack)?;
        let ctrl = Arc::new(FiberCtrl::new(id));
        let co = {
            let ctrl = Arc::clone(&ctrl);
            Coroutine::with_stack(stack, move |yielder, ()| {
                trampoline(yielder, &ctrl, &shared);
            })
        };
        Ok(Self { ctrl, co })
    }

    pub fn id(&self) -> FiberId {
        self.ctrl.id
    }

    pub fn state(&self) -> FiberState {
        self.ctrl.state()
    }

    pub(crate) fn ctrl(&self) -> &Arc<FiberCtrl> {
        &self.ctrl
    }

    /// Stage a task; the next resume will execute it.
    pub(crate) fn set_run(&self, task: Task) {
        self.ctrl.stage(task);
        self.ctrl.set_state(FiberState::Idle);
    }

    /// Switch into the fiber until it suspends or its trampoline exits,
    /// then report the state it left behind.
    pub(crate) fn resume(&mut self) -> FiberState {
        debug_assert!(!self.co.done(), "resumed a retired fiber");
        match self.co.resume(()) {
            CoroutineResult::Yield(()) | CoroutineResult::Return(()) => {}
        }
        self.ctrl.state()
    }

    /// Whether the trampoline has exited; a retired fiber cannot be
    /// resumed again.
    pub(crate) fn is_done(&self) -> bool {
        self.co.done()
    }
}

fn trampoline(yielder: &Yielder<(), ()>, ctrl: &FiberCtrl, shared: &Arc<Shared>) {
    log::trace!("fiber {} online", ctrl.id);
    loop {
        if let Some(task) = ctrl.take_staged() {
            ctrl.set_state(FiberState::Running);
            let ctx = FiberCtx {
                yielder,
                ctrl,
                shared,
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run(&ctx))) {
                shared.note_task_panic();
                log::error!(
                    "fiber {}: task panicked: {}",
                    ctrl.id,
                    panic_message(payload.as_ref())
                );
            }
            ctrl.set_state(FiberState::Idle);
        }
        if !ctrl.is_running() {
            break;
        }
        yielder.suspend(());
    }
    log::trace!("fiber {} offline", ctrl.id);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "opaque panic payload"
    }
}

/// The surface a task sees while running on a fiber.
///
/// Borrowed for the duration of the runner invocation; it cannot be stored
/// or sent elsewhere.
pub struct FiberCtx<'a> {
    yielder: &'a Yielder<(), ()>,
    ctrl: &'a FiberCtrl,
    shared: &'a Arc<Shared>,
}

impl FiberCtx<'_> {
    /// Id of the fiber this task runs on.
    pub fn id(&self) -> FiberId {
        self.ctrl.id
    }

    /// Suspend this fiber and return control to the worker that resumed it.
    ///
    /// The fiber stays in the `Running` state, so the worker will park it
    /// instead of recycling it; something must have been arranged to wake
    /// it again, normally a counter registration via
    /// [`add_waiter`](FiberCtx::add_waiter) before the increments.
    ///
    /// A `!Send` value must not be held across this call: the fiber may be
    /// resumed on a different worker thread.
    pub fn yield_to_main(&self) {
        self.yielder.suspend(());
    }

    /// Switch directly into `peer` and run it until it suspends or
    /// retires; its state on return is reported like a worker resume.
    ///
    /// The scheduler itself only ever switches fiber-to-main; this is for
    /// tasks that own another runner and want to drive it inline.
    pub fn yield_to(&self, peer: &mut FiberRunner) -> FiberState {
        peer.resume()
    }

    /// Whether this fiber has been asked to stop. Long-running tasks
    /// should check this and wind down.
    pub fn stop_requested(&self) -> bool {
        !self.ctrl.is_running()
    }

    /// Whether the pool is still accepting and scheduling new work.
    pub fn pool_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Submit a follow-up task, blocking while a bounded task queue is
    /// full. Returns `false` once the pool is stopping.
    pub fn submit(&self, task: Task) -> bool {
        self.shared.submit(task)
    }

    /// Submit a follow-up task without blocking; on `false` the task is
    /// discarded.
    pub fn submit_now(&self, task: Task) -> bool {
        self.shared.submit_now(task)
    }

    /// Register this fiber as a waiter on counter `index`.
    ///
    /// Call before the matching [`increment`](FiberCtx::increment), then
    /// yield with [`yield_to_main`](FiberCtx::yield_to_main); the zero
    /// crossing moves this fiber to the awake queue. A fiber must not wait
    /// on two counters at once.
    pub fn add_waiter(&self, index: usize) {
        self.shared.add_waiter(index, self.ctrl.id);
    }

    /// Raise counter `index` by `n`, returning the new value.
    pub fn increment(&self, index: usize, n: i64) -> i64 {
        self.shared.increment(index, n)
    }

    /// Lower counter `index` by `n`, returning the new value. Crossing
    /// zero releases all waiters on the slot.
    pub fn decrement(&self, index: usize, n: i64) -> i64 {
        self.shared.decrement(index, n)
    }

    /// Current value of counter `index`.
    pub fn counter(&self, index: usize) -> i64 {
        self.shared.counter(index)
    }
}

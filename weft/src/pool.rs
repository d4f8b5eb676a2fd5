// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The worker pool and its scheduling loop.
//!
//! Workers pull from two queues: awakened fibers first, fresh task/fiber
//! pairs second. Preferring awake fibers gives in-progress workflows
//! latency priority over new arrivals, so the tail of a dependency graph
//! is never starved by a flood of fresh submissions.
//!
//! A fiber that yields mid-task is still owned by the worker that observed
//! the yield; the worker deposits it in the park table, and the wake (a
//! counter's zero crossing) either finds it there or leaves a wake-pending
//! marker for the deposit to consume. Either way the fiber value reaches
//! the awake queue exactly once, with its saved context published by the
//! table and queue locks.

use crate::config::{Config, TaskQueueKind};
use crate::counter::CounterTable;
use crate::error::InitError;
use crate::fiber::{FiberCtrl, FiberId, FiberRunner, FiberState};
use crate::task::Task;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use weft_mpmc::{Channel, LinkedQueue, POLL_INTERVAL, RingQueue};

/// Sleep between signalling fibers to stop and waking blocked queue
/// operations, so in-flight pops can observe the stop flag first.
const STOP_GRACE: Duration = Duration::from_millis(1);

/// How often a fiber that refuses to retire is resumed before its stack is
/// leaked instead.
const RETIRE_ATTEMPTS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum PoolState {
    Uninit = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl PoolState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PoolState::Uninit,
            1 => PoolState::Running,
            2 => PoolState::Stopping,
            3 => PoolState::Stopped,
            _ => unreachable!("invalid pool state {raw}"),
        }
    }
}

/// A fiber that yielded mid-task, or the record of a wake that arrived
/// before the fiber was deposited.
enum Parked {
    Fiber(FiberRunner),
    WakePending,
}

/// State shared between the pool handle, the workers and every fiber.
pub(crate) struct Shared {
    state: AtomicU8,
    fiber_count: usize,
    /// Pending tasks; ring or linked per configuration.
    tasks: Box<dyn Channel<Task>>,
    /// Fibers with no task, ready to be armed.
    idle: RingQueue<FiberRunner>,
    /// Fibers whose wait was satisfied, preferred by the workers.
    awake: RingQueue<FiberRunner>,
    /// Fibers that yielded mid-task, keyed by id. See the module docs.
    parked: Mutex<HashMap<FiberId, Parked>>,
    /// Fibers whose trampoline has exited; they wait here for teardown.
    retired: Mutex<Vec<FiberRunner>>,
    counters: CounterTable,
    /// Every fiber ever created, for the shutdown broadcast. Disjoint from
    /// the runner values traveling through the queues above.
    registry: OnceLock<Box<[Arc<FiberCtrl>]>>,
    /// Workers nap here (briefly) when both fiber queues come up empty.
    nap_lock: Mutex<()>,
    work_available: Condvar,
    panicked_tasks: AtomicU64,
}

impl Shared {
    fn pool_state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.pool_state() == PoolState::Running
    }

    pub(crate) fn submit(&self, task: Task) -> bool {
        let accepted = self.tasks.push(task);
        if accepted {
            self.work_available.notify_one();
        }
        accepted
    }

    pub(crate) fn submit_now(&self, task: Task) -> bool {
        let accepted = self.tasks.push_now(task);
        if accepted {
            self.work_available.notify_one();
        }
        accepted
    }

    pub(crate) fn try_submit(&self, task: Task) -> Result<(), Task> {
        let outcome = self.tasks.try_push(task);
        if outcome.is_ok() {
            self.work_available.notify_one();
        }
        outcome
    }

    pub(crate) fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn add_waiter(&self, index: usize, fiber: FiberId) {
        self.counters.add_waiter(index, fiber);
    }

    pub(crate) fn increment(&self, index: usize, n: i64) -> i64 {
        self.counters.increment(index, n)
    }

    pub(crate) fn decrement(&self, index: usize, n: i64) -> i64 {
        self.counters.decrement(index, n, |fiber| self.wake(fiber))
    }

    pub(crate) fn counter(&self, index: usize) -> i64 {
        self.counters.value(index)
    }

    pub(crate) fn note_task_panic(&self) {
        self.panicked_tasks.fetch_add(1, Ordering::Relaxed);
    }

    fn parked(&self) -> MutexGuard<'_, HashMap<FiberId, Parked>> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retired(&self) -> MutexGuard<'_, Vec<FiberRunner>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a fiber released by its counter towards the awake queue.
    ///
    /// If the observing worker has not deposited the fiber yet, leave a
    /// marker; the deposit will forward it.
    fn wake(&self, fiber: FiberId) {
        let mut parked = self.parked();
        match parked.remove(&fiber) {
            Some(Parked::Fiber(runner)) => {
                drop(parked);
                self.push_awake(runner);
            }
            Some(Parked::WakePending) => {
                // Double wake; keep a single marker. A fiber waiting on
                // two counters at once violates the wait contract.
                log::warn!("fiber {fiber} woken twice before parking");
                parked.insert(fiber, Parked::WakePending);
            }
            None => {
                parked.insert(fiber, Parked::WakePending);
            }
        }
    }

    /// Deposit a fiber that yielded mid-task, or forward it straight to
    /// the awake queue when its wake already arrived.
    fn park(&self, runner: FiberRunner) {
        let id = runner.id();
        let mut parked = self.parked();
        match parked.remove(&id) {
            Some(Parked::WakePending) => {
                drop(parked);
                self.push_awake(runner);
            }
            Some(Parked::Fiber(_)) => {
                unreachable!("fiber {id} parked twice");
            }
            None => {
                parked.insert(id, Parked::Fiber(runner));
            }
        }
    }

    fn push_awake(&self, runner: FiberRunner) {
        match self.awake.try_push(runner) {
            Ok(()) => {
                self.work_available.notify_one();
            }
            Err(runner) => {
                // Cannot happen while the awake capacity is clamped to the
                // fiber count; if it ever does, hold the fiber for
                // teardown instead of losing its stack.
                log::error!("awake queue overflow; fiber {} held for teardown", runner.id());
                self.parked().insert(runner.id(), Parked::Fiber(runner));
            }
        }
    }

    fn release_idle(&self, runner: FiberRunner) {
        if let Err(runner) = self.idle.try_push(runner) {
            unreachable!("idle queue overflow with fiber {}", runner.id());
        }
    }

    /// Route a fiber after a resume returned.
    fn recycle(&self, runner: FiberRunner, state: FiberState) {
        if runner.is_done() {
            self.retired().push(runner);
        } else if state == FiberState::Running {
            self.park(runner);
        } else {
            self.release_idle(runner);
        }
    }

    /// Every fiber is home and nothing is queued.
    fn quiescent(&self) -> bool {
        self.tasks.is_empty() && self.idle.len() == self.fiber_count
    }

    fn nap(&self) {
        let guard = self.nap_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .work_available
            .wait_timeout(guard, POLL_INTERVAL)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn registry(&self) -> &[Arc<FiberCtrl>] {
        self.registry.get().expect("pool was not initialized")
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    log::debug!("worker {index} online");
    loop {
        // Awakened fibers first: resuming suspended work beats starting
        // fresh work.
        if let Some(mut fiber) = shared.awake.pop_now() {
            let state = fiber.resume();
            shared.recycle(fiber, state);
            continue;
        }

        if let Some(mut fiber) = shared.idle.pop_now() {
            if let Some(task) = shared.tasks.pop_now() {
                fiber.set_run(task);
                let state = fiber.resume();
                shared.recycle(fiber, state);
                continue;
            }
            shared.release_idle(fiber);
        }

        if !shared.is_running() && shared.tasks.is_empty() && shared.awake.is_empty() {
            break;
        }
        shared.nap();
    }
    log::debug!("worker {index} offline");
}

/// The fiber-driven worker-thread pool.
///
/// Lifecycle is explicit: [`init`](WorkerPool::init) brings the pool up,
/// [`wait_and_stop`](WorkerPool::wait_and_stop) or [`stop`](WorkerPool::stop)
/// takes it down. Dropping a running pool falls back to [`stop`](WorkerPool::stop).
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    #[expect(dead_code, reason = "reserved for adaptive worker scaling")]
    max_workers: usize,
}

impl WorkerPool {
    /// Build the fiber arena, spawn the workers and start scheduling.
    pub fn init(config: Config) -> Result<Self, InitError> {
        config.validate()?;

        let tasks: Box<dyn Channel<Task>> = match config.task_queue {
            TaskQueueKind::Unbounded => Box::new(LinkedQueue::<Task>::new()),
            TaskQueueKind::Bounded(capacity) => {
                Box::new(RingQueue::<Task>::with_capacity(capacity))
            }
        };
        // A wake must never overflow the awake queue.
        let awake_capacity = config.awake_capacity.max(config.fiber_count);

        let shared = Arc::new(Shared {
            state: AtomicU8::new(PoolState::Uninit as u8),
            fiber_count: config.fiber_count,
            tasks,
            idle: RingQueue::with_capacity(config.fiber_count),
            awake: RingQueue::with_capacity(awake_capacity),
            parked: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            counters: CounterTable::new(config.counter_count),
            registry: OnceLock::new(),
            nap_lock: Mutex::new(()),
            work_available: Condvar::new(),
            panicked_tasks: AtomicU64::new(0),
        });

        let mut registry = Vec::with_capacity(config.fiber_count);
        for index in 0..config.fiber_count {
            let fiber = FiberRunner::new(
                FiberId(index as u32),
                config.fiber_stack_size,
                Arc::clone(&shared),
            )?;
            registry.push(Arc::clone(fiber.ctrl()));
            shared.release_idle(fiber);
        }
        shared
            .registry
            .set(registry.into_boxed_slice())
            .unwrap_or_else(|_| unreachable!("fiber registry initialized twice"));

        shared.state.store(PoolState::Running as u8, Ordering::Release);

        let mut workers = Vec::with_capacity(config.min_workers);
        for index in 0..config.min_workers {
            let spawned = thread::Builder::new()
                .name(format!("weft-worker-{index}"))
                .spawn({
                    let shared = Arc::clone(&shared);
                    move || worker_loop(&shared, index)
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    let mut pool = Self {
                        shared,
                        workers,
                        max_workers: config.max_workers,
                    };
                    pool.stop();
                    return Err(InitError::Thread(err));
                }
            }
        }

        log::debug!(
            "pool online: {} workers, {} fibers, {} counters",
            workers.len(),
            config.fiber_count,
            config.counter_count,
        );
        Ok(Self {
            shared,
            workers,
            max_workers: config.max_workers,
        })
    }

    /// Whether [`init`](WorkerPool::init) completed.
    pub fn is_init(&self) -> bool {
        self.shared.pool_state() != PoolState::Uninit
    }

    /// Whether the pool is accepting and scheduling work.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Pending (not yet started) tasks.
    pub fn task_count(&self) -> usize {
        self.shared.task_count()
    }

    /// Tasks whose runner panicked and was aborted.
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked_tasks.load(Ordering::Relaxed)
    }

    /// Submit a task, blocking while a bounded task queue is full.
    /// Returns `false` once the pool is stopping.
    pub fn submit(&self, task: Task) -> bool {
        self.shared.submit(task)
    }

    /// Submit a task without blocking; on `false` the task is discarded.
    pub fn submit_now(&self, task: Task) -> bool {
        self.shared.submit_now(task)
    }

    /// Submit a task without blocking, handing it back when the queue is
    /// full.
    pub fn try_submit(&self, task: Task) -> Result<(), Task> {
        self.shared.try_submit(task)
    }

    /// Register `fiber` as a waiter on counter `index`. Prefer
    /// [`FiberCtx::add_waiter`](crate::FiberCtx::add_waiter) from inside a
    /// task.
    pub fn add_waiter(&self, index: usize, fiber: FiberId) {
        self.shared.add_waiter(index, fiber);
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

    /// Number of sync counter slots.
    pub fn counter_count(&self) -> usize {
        self.shared.counters.len()
    }

    /// Finish all submitted work, then shut down.
    ///
    /// Blocks until the task queue and the awake queue have drained, every
    /// fiber has returned home and every worker has exited. Every runner
    /// submitted before (and during) the drain runs to completion; compare
    /// [`stop`](WorkerPool::stop). Waits that are never satisfied by a
    /// decrement will make this block forever.
    pub fn wait_and_stop(&mut self) {
        if !self.begin_stop() {
            return;
        }
        self.shared.tasks.block_till_empty();
        self.shared.awake.block_till_empty();
        // In-flight fibers may still be running and submitting follow-up
        // work; wait until every fiber is home and nothing is queued.
        while !self.shared.quiescent() {
            thread::yield_now();
        }
        self.finish_stop();
    }

    /// Shut down after the currently executing tasks; queued tasks are
    /// dropped.
    pub fn stop(&mut self) {
        if !self.begin_stop() {
            return;
        }
        let mut dropped = 0usize;
        while let Some(task) = self.shared.tasks.pop_now() {
            drop(task);
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("dropped {dropped} queued tasks");
        }
        self.finish_stop();
    }

    fn begin_stop(&self) -> bool {
        self.shared
            .state
            .compare_exchange(
                PoolState::Running as u8,
                PoolState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn finish_stop(&mut self) {
        for ctrl in self.shared.registry() {
            ctrl.stop();
        }
        thread::sleep(STOP_GRACE);
        self.shared.tasks.notify_stop();
        self.shared.awake.notify_stop();
        self.shared.work_available.notify_all();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("a worker thread panicked");
            }
        }

        self.retire_fibers();
        self.shared
            .state
            .store(PoolState::Stopped as u8, Ordering::Release);
        log::debug!("pool offline");
    }

    /// Run every fiber's trampoline to completion so the coroutines can be
    /// dropped. Fibers stuck mid-task have their pending waits released
    /// first; one that still refuses to finish gets its stack leaked
    /// rather than torn down under it.
    fn retire_fibers(&mut self) {
        let shared = &self.shared;
        shared.counters.drain_all(|fiber| shared.wake(fiber));

        let mut fibers = Vec::with_capacity(shared.fiber_count);
        while let Some(fiber) = shared.awake.pop_now() {
            fibers.push(fiber);
        }
        while let Some(fiber) = shared.idle.pop_now() {
            fibers.push(fiber);
        }
        for (_, slot) in shared.parked().drain() {
            if let Parked::Fiber(fiber) = slot {
                fibers.push(fiber);
            }
        }
        fibers.append(&mut shared.retired());

        for mut fiber in fibers {
            let mut attempts = 0;
            while !fiber.is_done() && attempts < RETIRE_ATTEMPTS {
                fiber.resume();
                attempts += 1;
            }
            if !fiber.is_done() {
                log::warn!("fiber {} would not retire; leaking its stack", fiber.id());
                std::mem::forget(fiber);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.shared.pool_state() == PoolState::Running {
            self.stop();
        }
    }
}

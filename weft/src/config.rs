// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::InitError;
use std::thread;

/// Capacity behavior of the task submission queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskQueueKind {
    /// Linked queue; `submit` always succeeds.
    Unbounded,
    /// Ring of the given capacity; `submit_now` fails when full.
    Bounded(usize),
}

/// Construction parameters for a [`WorkerPool`](crate::WorkerPool).
///
/// ```
/// use weft::{Config, TaskQueueKind};
///
/// let config = Config::default()
///     .with_workers(4)
///     .with_fiber_count(64)
///     .with_task_queue(TaskQueueKind::Bounded(1 << 16));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Worker threads spawned at init.
    pub min_workers: usize,
    /// Upper bound on worker threads.
    // TODO: grow the pool up to `max_workers` under sustained task-queue
    // pressure; today exactly `min_workers` threads run.
    pub max_workers: usize,
    /// Fibers created at init; bounds the amount of concurrently suspended
    /// work.
    pub fiber_count: usize,
    /// Stack size per fiber in bytes.
    pub fiber_stack_size: usize,
    /// Task queue variant.
    pub task_queue: TaskQueueKind,
    /// Capacity of the awake-fiber queue; raised to `fiber_count` when
    /// smaller so a wake can never overflow it.
    pub awake_capacity: usize,
    /// Number of sync counter slots.
    pub counter_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        let workers = thread::available_parallelism().map_or(4, usize::from);
        Self {
            min_workers: workers,
            max_workers: workers,
            fiber_count: 1 << 8,
            fiber_stack_size: 128 << 10,
            task_queue: TaskQueueKind::Bounded(1 << 16),
            awake_capacity: 1 << 10,
            counter_count: 1 << 10,
        }
    }
}

impl Config {
    /// Use exactly `workers` worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.min_workers = workers;
        self.max_workers = workers;
        self
    }

    pub fn with_worker_range(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    pub fn with_fiber_count(mut self, fibers: usize) -> Self {
        self.fiber_count = fibers;
        self
    }

    pub fn with_fiber_stack_size(mut self, bytes: usize) -> Self {
        self.fiber_stack_size = bytes;
        self
    }

    pub fn with_task_queue(mut self, kind: TaskQueueKind) -> Self {
        self.task_queue = kind;
        self
    }

    pub fn with_awake_capacity(mut self, capacity: usize) -> Self {
        self.awake_capacity = capacity;
        self
    }

    pub fn with_counter_count(mut self, count: usize) -> Self {
        self.counter_count = count;
        self
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.min_workers == 0 {
            return Err(InitError::InvalidConfig("at least one worker is required"));
        }
        if self.max_workers < self.min_workers {
            return Err(InitError::InvalidConfig(
                "max_workers must be at least min_workers",
            ));
        }
        if self.fiber_count == 0 {
            return Err(InitError::InvalidConfig("at least one fiber is required"));
        }
        if self.fiber_count > u32::MAX as usize {
            return Err(InitError::InvalidConfig("fiber_count exceeds the id space"));
        }
        if self.fiber_stack_size < 16 << 10 {
            return Err(InitError::InvalidConfig(
                "fiber stacks below 16 KiB are not supported",
            ));
        }
        if matches!(self.task_queue, TaskQueueKind::Bounded(0)) {
            return Err(InitError::InvalidConfig(
                "bounded task queue capacity must be non-zero",
            ));
        }
        if self.counter_count == 0 {
            return Err(InitError::InvalidConfig(
                "at least one sync counter slot is required",
            ));
        }
        Ok(())
    }
}

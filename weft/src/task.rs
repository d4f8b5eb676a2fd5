// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::fiber::FiberCtx;
use std::fmt;
use weft_region::Payload;

/// A unit of work to run once on a fiber.
///
/// A task owns its runner and whatever payload the runner captured; both
/// are consumed when the runner is invoked, and the task object itself is
/// released by the fiber that executed it.
pub struct Task {
    runner: Box<dyn FnOnce(&FiberCtx<'_>) + Send + 'static>,
}

impl Task {
    /// Wrap a closure as a task. The payload is whatever the closure
    /// captures.
    pub fn new<F>(runner: F) -> Self
    where
        F: FnOnce(&FiberCtx<'_>) + Send + 'static,
    {
        Self {
            runner: Box::new(runner),
        }
    }

    /// Build a task from an explicit `(runner, payload)` pair.
    ///
    /// Ownership of the payload transfers to the runner, which consumes it;
    /// the backing region allocation is released when the payload is
    /// consumed or dropped.
    pub fn from_parts<T>(runner: fn(&FiberCtx<'_>, Payload<T>), payload: Payload<T>) -> Self
    where
        T: Send + 'static,
    {
        Self::new(move |ctx| runner(ctx, payload))
    }

    pub(crate) fn run(self, ctx: &FiberCtx<'_>) {
        (self.runner)(ctx);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Task")
    }
}

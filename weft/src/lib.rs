//! A fiber-based task-execution runtime for soft-realtime workloads.
//!
//! A [`WorkerPool`] drives a fixed arena of stackful fibers from a small
//! set of OS worker threads. Tasks are submitted as `(runner, payload)`
//! units; a worker binds each task to an idle fiber and switches into it.
//! Inside a task, continuations are expressed against *sync counters*: a
//! fiber registers as a waiter, raises the counter by the number of
//! sub-tasks it spawns, and yields; the decrement that returns the counter
//! to zero releases the fiber into the awake queue, which every worker
//! prefers over starting fresh work.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use weft::{Config, Task, WorkerPool};
//!
//! let mut pool = WorkerPool::init(Config::default().with_workers(2).with_fiber_count(8))?;
//!
//! let hits = Arc::new(AtomicU32::new(0));
//! for _ in 0..4 {
//!     let hits = Arc::clone(&hits);
//!     pool.submit(Task::new(move |_ctx| {
//!         hits.fetch_add(1, Ordering::Relaxed);
//!     }));
//! }
//!
//! pool.wait_and_stop();
//! assert_eq!(hits.load(Ordering::Relaxed), 4);
//! # Ok::<(), weft::InitError>(())
//! ```
//!
//! The fan-out/wait pattern from inside a task looks like this: call
//! [`FiberCtx::add_waiter`] for a counter slot, raise it with
//! [`FiberCtx::increment`] by the number of sub-tasks, submit sub-tasks
//! that each end with [`FiberCtx::decrement`], then suspend with
//! [`FiberCtx::yield_to_main`]. Registration happens before the increment,
//! so no sub-task can observe the zero crossing early; the runtime takes
//! care of the remaining race between the release and the yield itself.
//!
//! Scheduling is cooperative: there is no preemption, no work stealing and
//! no fiber affinity. Any worker may resume any fiber, which is also why a
//! `!Send` value must never be held across a yield.

mod config;
mod counter;
mod error;
mod fiber;
mod pool;
mod task;

pub use config::{Config, TaskQueueKind};
pub use error::InitError;
pub use fiber::{FiberCtx, FiberId, FiberRunner, FiberState};
pub use pool::WorkerPool;
pub use task::Task;

pub use weft_mpmc as mpmc;
pub use weft_region as region;

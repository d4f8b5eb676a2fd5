//! Shutdown semantics of the two stop flavors.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;
use weft::{Config, Task, WorkerPool};

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::init(
        Config::default()
            .with_workers(workers)
            .with_fiber_count(16),
    )
    .expect("pool init failed")
}

/// `wait_and_stop` called while tasks are in flight returns only after
/// every submitted runner has returned; nothing is dropped.
#[test]
fn wait_and_stop_finishes_in_flight_work() {
    common::init_logger();

    const TASKS: u32 = 40;
    let mut pool = pool(2);
    let finished = Arc::new(AtomicU32::new(0));

    for _ in 0..TASKS {
        let finished = Arc::clone(&finished);
        assert!(pool.submit(Task::new(move |_ctx| {
            thread::sleep(Duration::from_millis(2));
            finished.fetch_add(1, Ordering::Relaxed);
        })));
    }
    pool.wait_and_stop();

    assert_eq!(finished.load(Ordering::Relaxed), TASKS);
    assert_eq!(pool.task_count(), 0);
}

/// `stop` drops what is still queued but finishes what already started.
#[test]
fn stop_discards_the_backlog() {
    common::init_logger();

    const TASKS: u32 = 100;
    let mut pool = pool(1);
    let finished = Arc::new(AtomicU32::new(0));

    for _ in 0..TASKS {
        let finished = Arc::clone(&finished);
        pool.submit(Task::new(move |_ctx| {
            thread::sleep(Duration::from_millis(2));
            finished.fetch_add(1, Ordering::Relaxed);
        }));
    }
    pool.stop();

    assert!(
        finished.load(Ordering::Relaxed) < TASKS,
        "stop should drop queued tasks"
    );
    assert_eq!(pool.task_count(), 0);
    assert!(!pool.is_running());
}

/// Dropping a running pool falls back to `stop`: the process does not
/// hang on unjoined workers.
#[test]
fn dropping_a_running_pool_shuts_it_down() {
    common::init_logger();

    let pool = pool(2);
    let finished = Arc::new(AtomicU32::new(0));
    for _ in 0..8 {
        let finished = Arc::clone(&finished);
        pool.submit(Task::new(move |_ctx| {
            finished.fetch_add(1, Ordering::Relaxed);
        }));
    }
    drop(pool);
}

/// A second shutdown call is a no-op.
#[test]
fn shutdown_is_idempotent() {
    common::init_logger();

    let mut pool = pool(2);
    let finished = Arc::new(AtomicU32::new(0));
    for _ in 0..8 {
        let finished = Arc::clone(&finished);
        pool.submit(Task::new(move |_ctx| {
            finished.fetch_add(1, Ordering::Relaxed);
        }));
    }
    pool.wait_and_stop();
    let after_first = finished.load(Ordering::Relaxed);
    pool.wait_and_stop();
    pool.stop();

    assert_eq!(after_first, 8);
    assert_eq!(finished.load(Ordering::Relaxed), 8);
}

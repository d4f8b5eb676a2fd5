//! Awakened fibers are scheduled ahead of fresh task starts.

mod common;

use std::sync::{Arc, Mutex};
use weft::{Config, Task, WorkerPool};

fn record(events: &Arc<Mutex<Vec<&'static str>>>, event: &'static str) {
    events.lock().unwrap().push(event);
}

/// Single worker, so the event order is the scheduling order. The sub-task
/// wakes the suspended main task and then enqueues more fresh work; the
/// worker must resume the awakened fiber before starting any of it.
#[test]
fn awake_fiber_beats_fresh_tasks() {
    common::init_logger();

    let mut pool = WorkerPool::init(
        Config::default()
            .with_workers(1)
            .with_fiber_count(4)
            .with_counter_count(4),
    )
    .expect("pool init failed");

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let events = Arc::clone(&events);
        pool.submit(Task::new(move |ctx| {
            record(&events, "main-start");
            ctx.add_waiter(0);
            ctx.increment(0, 1);
            {
                let events = Arc::clone(&events);
                ctx.submit(Task::new(move |sub| {
                    record(&events, "sub");
                    // Fresh work enqueued before the wake happens.
                    for _ in 0..4 {
                        let events = Arc::clone(&events);
                        sub.submit(Task::new(move |_ctx| {
                            record(&events, "late");
                        }));
                    }
                    sub.decrement(0, 1);
                }));
            }
            ctx.yield_to_main();
            record(&events, "main-resumed");
        }));
    }
    pool.wait_and_stop();

    let events = events.lock().unwrap().clone();
    assert_eq!(events.first(), Some(&"main-start"));
    let resumed = events
        .iter()
        .position(|&event| event == "main-resumed")
        .expect("main task never resumed");
    let first_late = events
        .iter()
        .position(|&event| event == "late")
        .expect("late tasks never ran");
    assert!(
        resumed < first_late,
        "a fresh task started while an awakened fiber was waiting: {events:?}"
    );
    assert_eq!(events.iter().filter(|&&event| event == "late").count(), 4);
}

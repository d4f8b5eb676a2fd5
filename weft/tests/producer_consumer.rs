//! Producer/consumer tasks sharing a bounded ring.

mod common;

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use weft::mpmc::RingQueue;
use weft::{Config, Task, WorkerPool};

/// Paired producer/consumer tasks move random values through a shared
/// ring. Every produced value is consumed exactly once: the sums match and
/// the ring ends empty.
///
/// Submitting in pairs keeps consumers from racing ahead of the supply by
/// more than the in-flight window, so the blocking pops resolve quickly.
#[test]
fn sums_match_across_the_shared_ring() {
    common::init_logger();

    const PAIRS: usize = 1600;

    let mut pool = WorkerPool::init(
        Config::default()
            .with_workers(4)
            .with_fiber_count(64),
    )
    .expect("pool init failed");

    let goods: Arc<RingQueue<u64>> = Arc::new(RingQueue::with_capacity(1024));
    let produced = Arc::new(AtomicU64::new(0));
    let consumed = Arc::new(AtomicU64::new(0));

    for _ in 0..PAIRS {
        {
            let goods = Arc::clone(&goods);
            let produced = Arc::clone(&produced);
            assert!(pool.submit(Task::new(move |_ctx| {
                let value = rand::rng().random_range(0..1000u64);
                assert!(goods.push(value), "goods ring stopped early");
                produced.fetch_add(value, Ordering::Relaxed);
            })));
        }
        {
            let goods = Arc::clone(&goods);
            let consumed = Arc::clone(&consumed);
            assert!(pool.submit(Task::new(move |_ctx| {
                let value = goods.pop().expect("goods ring stopped early");
                consumed.fetch_add(value, Ordering::Relaxed);
            })));
        }
    }
    pool.wait_and_stop();

    assert_eq!(
        produced.load(Ordering::Relaxed),
        consumed.load(Ordering::Relaxed)
    );
    assert!(goods.is_empty());
    assert_eq!(pool.panicked_tasks(), 0);
}

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use weft_mpmc::{LinkedQueue, RingQueue};

fn ring_push_pop(c: &mut Criterion) {
    let ring = RingQueue::with_capacity(1024);
    c.bench_function("ring_push_pop", |b| {
        b.iter(|| {
            assert!(ring.push_now(black_box(1u64)));
            black_box(ring.pop_now());
        });
    });
}

fn linked_push_pop(c: &mut Criterion) {
    let queue = LinkedQueue::new();
    c.bench_function("linked_push_pop", |b| {
        b.iter(|| {
            queue.push(black_box(1u64));
            black_box(queue.pop_now());
        });
    });
}

criterion_group!(benches, ring_push_pop, linked_push_pop);
criterion_main!(benches);

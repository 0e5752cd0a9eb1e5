// Broadcast queue performance benchmarks
// Tests enqueue/invalidate throughput and get_broadcasts selection cost
// under varying cluster sizes, since both scale with gossip fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meshkeeper::broadcast::{Broadcast, TransmitLimitedQueue};

struct Msg {
    id: String,
    bytes: Vec<u8>,
}

impl Broadcast for Msg {
    fn invalidates(&self, other: &dyn Broadcast) -> bool {
        other.name() == self.name()
    }
    fn message(&self) -> &[u8] {
        &self.bytes
    }
    fn name(&self) -> &str {
        &self.id
    }
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_enqueue");

    for n_nodes in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("enqueue", n_nodes), &n_nodes, |b, &n_nodes| {
            let queue = TransmitLimitedQueue::new(4);
            b.iter(|| {
                for i in 0..n_nodes {
                    queue.enqueue(Box::new(Msg { id: i.to_string(), bytes: vec![0u8; 128] }));
                }
            });
        });
    }

    group.finish();
}

fn bench_get_broadcasts(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_get_broadcasts");

    for n_nodes in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("drain", n_nodes), &n_nodes, |b, &n_nodes| {
            let queue = TransmitLimitedQueue::new(4);
            for i in 0..n_nodes {
                queue.enqueue(Box::new(Msg { id: i.to_string(), bytes: vec![0u8; 128] }));
            }
            b.iter(|| {
                black_box(queue.get_broadcasts(3, 1400, n_nodes));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_get_broadcasts);
criterion_main!(benches);

//! 阶段链吞吐基准：序列源经直通链整段排水的开销。

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ripple_core::{Completion, Demand, PublisherExt, SharedSubscription, Subscriber, sequence};
use ripple_core::Publisher;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 零记录的吸收订阅者：只计数，不分配。
struct Sink {
    seen: Arc<AtomicU64>,
}

impl Subscriber for Sink {
    type Input = u64;
    type Failure = Infallible;

    fn receive_subscription(&self, subscription: SharedSubscription) {
        subscription.request(Demand::UNLIMITED);
    }

    fn receive_value(&self, value: u64) -> Demand {
        self.seen.fetch_add(value, Ordering::Relaxed);
        Demand::NONE
    }

    fn receive_completion(&self, _completion: Completion<Infallible>) {}
}

fn passthrough_chain(criterion: &mut Criterion) {
    criterion.bench_function("sequence_map_filter_drain_10k", |bencher| {
        bencher.iter(|| {
            let seen = Arc::new(AtomicU64::new(0));
            sequence(0u64..10_000)
                .map(|value| value.wrapping_mul(3))
                .filter(|value| value % 7 != 0)
                .subscribe(Sink {
                    seen: Arc::clone(&seen),
                });
            black_box(seen.load(Ordering::Relaxed))
        });
    });
}

fn demand_arithmetic(criterion: &mut Criterion) {
    criterion.bench_function("demand_saturating_ops", |bencher| {
        bencher.iter(|| {
            let mut demand = Demand::NONE;
            for step in 0..1_000u64 {
                demand += Demand::finite(step);
                demand -= Demand::finite(step / 2);
            }
            black_box(demand)
        });
    });
}

criterion_group!(benches, passthrough_chain, demand_arithmetic);
criterion_main!(benches);

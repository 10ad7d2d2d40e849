use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pacer::{
    calculator::compute, AccountingHeap, Controller, HeapOptions, PacerOptions, Policy,
    DEFAULT_RATIO,
};

const GB: u64 = 1024 * 1024 * 1024;

pub fn bench_compute(c: &mut Criterion) {
    c.bench_function("compute", |b| {
        b.iter(|| {
            let mut sum = 0i64;
            let mut live = 1024u64;
            while live < GB {
                sum += compute(black_box(70.0), GB, live, f64::INFINITY, DEFAULT_RATIO) as i64;
                live *= 2;
            }
            sum
        })
    });
}

pub fn bench_trees(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary trees");
    group.sample_size(20);
    let n = 12;

    for i in n..17 {
        let min_depth = 4;
        let max_depth = (min_depth + 2).max(i);
        for (name, policy) in [
            ("static", Policy::ratio(DEFAULT_RATIO)),
            ("budget", Policy::budget(10.0)),
        ] {
            group.bench_function(BenchmarkId::new(name, i), |b| {
                b.iter_batched(
                    || paced_heap(policy),
                    |(heap, controller)| {
                        let mut depth = min_depth;
                        while depth < max_depth {
                            let iterations = 1 << (max_depth - depth + min_depth);
                            for _ in 0..iterations {
                                tree::bottom_up_tree(&heap, depth).item_check();
                            }
                            depth += 2;
                        }
                        controller.shutdown();
                        heap.cycles()
                    },
                    criterion::BatchSize::LargeInput,
                );
            });
        }
    }

    group.finish();
}

fn paced_heap(policy: Policy) -> (Arc<AccountingHeap>, Arc<Controller>) {
    let heap = Arc::new(AccountingHeap::new(HeapOptions {
        capacity: Some(GB),
        ..HeapOptions::default()
    }));
    let controller = Controller::start(
        PacerOptions::new()
            .with_static_config(policy)
            .with_collector(heap.clone()),
    )
    .unwrap();
    (heap, controller)
}

criterion_group!(benches, bench_compute, bench_trees);
criterion_main!(benches);

mod tree {
    use pacer::AccountingHeap;

    pub struct Tree {
        first: Option<Box<Self>>,
        second: Option<Box<Self>>,
    }

    impl Tree {
        pub fn item_check(&self) -> i32 {
            match (&self.first, &self.second) {
                (Some(first), Some(second)) => 1 + first.item_check() + second.item_check(),
                _ => 1,
            }
        }
    }

    /// Builds a tree and accounts every node with `heap`. A due collection keeps
    /// only the nodes built so far in this tree alive.
    pub fn bottom_up_tree(heap: &AccountingHeap, depth: i32) -> Box<Tree> {
        let mut built = 0u64;
        build(heap, depth, &mut built)
    }

    fn build(heap: &AccountingHeap, mut depth: i32, built: &mut u64) -> Box<Tree> {
        let node = if depth > 0 {
            depth -= 1;
            let first = build(heap, depth, built);
            let second = build(heap, depth, built);
            Tree {
                first: Some(first),
                second: Some(second),
            }
        } else {
            Tree {
                first: None,
                second: None,
            }
        };
        let size = std::mem::size_of::<Tree>() as u64;
        *built += size;
        if heap.record_allocation(size) {
            heap.finish_cycle(*built);
        }
        Box::new(node)
    }
}

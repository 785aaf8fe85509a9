use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lazyexpr::{BackendKind, Context, source};

const LENGTH: i64 = 10_000;

fn bench_rolling_sum(c: &mut Criterion) {
    let ctx = Context::single((0..LENGTH).collect::<Vec<_>>());
    let mut group = c.benchmark_group("rolling_sum");
    for window in [10_usize, 100] {
        let expr = source(0).rolling(window).agg(source(0).sum());
        for backend in [BackendKind::GenericSequence, BackendKind::VectorizedArray] {
            group.bench_with_input(
                BenchmarkId::new(backend.to_string(), window),
                &expr,
                |b, expr| b.iter(|| expr.eval(black_box(&ctx), Some(backend))),
            );
        }
    }
    group.finish();
}

fn bench_eager_sum(c: &mut Criterion) {
    let ctx = Context::single((0..LENGTH).collect::<Vec<_>>());
    let expr = source(0).abs().sum();
    c.bench_function("sum", |b| b.iter(|| expr.eval(black_box(&ctx), None)));
}

criterion_group!(benches, bench_rolling_sum, bench_eager_sum);
criterion_main!(benches);

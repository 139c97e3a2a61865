//! Benchmark for the Fx effect value: construction, fusion, run loop.
//!
//! Measures composition and evaluation cost around the fusion threshold,
//! error recovery, bracket overhead, and fork/join round trips.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::ops::ControlFlow;
use std::sync::Arc;

use fxcore::concurrent::{Immediate, Scheduler};
use fxcore::fx::{Fx, FxError};

// =============================================================================
// Construction & Fusion
// =============================================================================

fn benchmark_fx_construction(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fx_construction");

    group.bench_function("pure", |bencher| {
        bencher.iter(|| {
            let effect = Fx::pure(black_box(42));
            black_box(effect.run_unsafe())
        });
    });

    group.bench_function("new", |bencher| {
        bencher.iter(|| {
            let effect = Fx::new(|| 42);
            black_box(effect.run_unsafe())
        });
    });

    group.finish();
}

fn benchmark_fx_map_fusion(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fx_map_fusion");

    // Eager fusion: all maps collapse at construction.
    group.bench_function("map_over_pure_x100", |bencher| {
        bencher.iter(|| {
            let mut effect = Fx::pure(black_box(0i64));
            for _ in 0..100 {
                effect = effect.map(|x| x + 1);
            }
            black_box(effect.run_unsafe())
        });
    });

    // Stage-chain fusion: one suspension, a flat chain of stages.
    group.bench_function("map_over_suspended_x100", |bencher| {
        bencher.iter(|| {
            let mut effect = Fx::new(|| 0i64);
            for _ in 0..100 {
                effect = effect.map(|x| x + 1);
            }
            black_box(effect.run_unsafe())
        });
    });

    // Past the threshold: rewrites route through the run loop.
    group.bench_function("map_over_pure_x1000", |bencher| {
        bencher.iter(|| {
            let mut effect = Fx::pure(black_box(0i64));
            for _ in 0..1000 {
                effect = effect.map(|x| x + 1);
            }
            black_box(effect.run_unsafe())
        });
    });

    group.finish();
}

fn benchmark_fx_flat_map_chain(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fx_flat_map_chain");

    for depth in [10usize, 100, 1000] {
        group.bench_function(format!("flat_map_x{depth}"), |bencher| {
            bencher.iter(|| {
                let mut effect = Fx::pure(0i64);
                for _ in 0..depth {
                    effect = effect.flat_map(|x| Fx::pure(x + 1));
                }
                black_box(effect.run_unsafe())
            });
        });
    }

    group.finish();
}

fn benchmark_fx_tail_rec_m(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fx_tail_rec_m");

    group.bench_function("iterations_10000", |bencher| {
        bencher.iter(|| {
            let effect = Fx::tail_rec_m(black_box(10_000u32), |n| {
                Fx::pure(if n == 0 {
                    ControlFlow::Break(0u32)
                } else {
                    ControlFlow::Continue(n - 1)
                })
            });
            black_box(effect.run_unsafe())
        });
    });

    group.finish();
}

// =============================================================================
// Error Channel
// =============================================================================

fn benchmark_fx_error_path(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fx_error_path");

    group.bench_function("attempt_success", |bencher| {
        bencher.iter(|| {
            let effect = Fx::pure(black_box(1)).attempt();
            black_box(effect.run_unsafe())
        });
    });

    group.bench_function("raise_and_recover", |bencher| {
        bencher.iter(|| {
            let effect =
                Fx::<i32>::raise_error(FxError::Canceled).handle_error_with(|_| Fx::pure(0));
            black_box(effect.run_unsafe())
        });
    });

    group.finish();
}

// =============================================================================
// Resource Safety & Fibers
// =============================================================================

fn benchmark_fx_bracket(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fx_bracket");

    group.bench_function("bracket_success", |bencher| {
        bencher.iter(|| {
            let effect = Fx::pure(black_box(1)).bracket(
                |resource| Fx::pure(resource + 1),
                |_resource| Fx::unit(),
            );
            black_box(effect.run_unsafe())
        });
    });

    group.finish();
}

fn benchmark_fx_fork_join(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fx_fork_join");
    let scheduler: Arc<dyn Scheduler> = Arc::new(Immediate);

    group.bench_function("fork_join_immediate", |bencher| {
        bencher.iter(|| {
            let effect = Fx::pure(black_box(21))
                .map(|x| x * 2)
                .fork(&scheduler)
                .flat_map(|fiber| fiber.join());
            black_box(effect.run_unsafe())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_fx_construction,
    benchmark_fx_map_fusion,
    benchmark_fx_flat_map_chain,
    benchmark_fx_tail_rec_m,
    benchmark_fx_error_path,
    benchmark_fx_bracket,
    benchmark_fx_fork_join,
);
criterion_main!(benches);

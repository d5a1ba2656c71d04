//! Scheduler performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use newcore::prelude::*;
use std::time::Duration;

fn bench_config() -> SchedulerConfig {
    SchedulerConfig {
        idle_sleep: Duration::ZERO,
        ..Default::default()
    }
}

fn bench_update_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_update_fan_out");

    for workers in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            let mut scheduler = Scheduler::new(bench_config());
            for _ in 0..workers {
                scheduler.add_worker(BasicWorker::passive()).unwrap();
            }
            scheduler.start().unwrap();

            let task = Task::from_fn("bench", |_| {
                black_box(());
            });

            b.iter(|| {
                scheduler.add_task(&task);
                scheduler.update();
            });

            scheduler.shutdown();
        });
    }

    group.finish();
}

fn bench_fiber_resume(c: &mut Criterion) {
    c.bench_function("fiber_worker_resume", |b| {
        let mut scheduler = Scheduler::new(bench_config());
        scheduler.add_worker(BasicWorker::fiber()).unwrap();
        scheduler.start().unwrap();

        b.iter(|| {
            scheduler.update();
        });

        scheduler.shutdown();
    });
}

fn bench_locked_execution(c: &mut Criterion) {
    c.bench_function("locked_task_execution_100", |b| {
        let registry = std::sync::Arc::new(DataRegistry::new());
        let mut scheduler = Scheduler::new(bench_config());
        scheduler
            .add_worker(BasicWorker::passive().with_lock(registry))
            .unwrap();
        scheduler.start().unwrap();

        let task = Task::from_fn("guarded", |data| {
            black_box(data.is_some());
        });

        b.iter(|| {
            for _ in 0..100 {
                scheduler.add_task(&task);
            }
            scheduler.update();
        });

        scheduler.shutdown();
    });
}

criterion_group!(
    benches,
    bench_update_fan_out,
    bench_fiber_resume,
    bench_locked_execution
);
criterion_main!(benches);

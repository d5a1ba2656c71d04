//! Shared helpers for newcore integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use newcore::prelude::*;

/// Scheduler configuration that never naps for long
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        idle_sleep: Duration::from_millis(1),
        ..Default::default()
    }
}

/// Engine configuration with a short poll interval
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(5),
        thread_name_prefix: "test-engine".to_string(),
    }
}

/// Poll `condition` until it holds or `deadline` passes
pub fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Task that bumps `counter` when run
pub fn counting_task(category: &'static str, counter: &Arc<AtomicUsize>) -> Task {
    let counter = Arc::clone(counter);
    Task::from_fn(category, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })
}

/// Lifecycle hook counters shared by every [`TrackedWorker`] of a test
#[derive(Debug, Default)]
pub struct HookCounters {
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
}

impl HookCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Worker of any mode that records its start and finish hooks
pub struct TrackedWorker {
    mode: InterleaveMode,
    hooks: Arc<HookCounters>,
}

impl TrackedWorker {
    pub fn new(mode: InterleaveMode, hooks: &Arc<HookCounters>) -> Self {
        Self {
            mode,
            hooks: Arc::clone(hooks),
        }
    }
}

impl WorkerKind for TrackedWorker {
    fn mode(&self) -> InterleaveMode {
        self.mode
    }

    fn on_start(&mut self) {
        self.hooks.started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_finish(&mut self) {
        self.hooks.finished.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs `engine` on a background thread
pub fn spawn_engine(engine: &Engine) -> thread::JoinHandle<Result<()>> {
    let runner = engine.clone();
    thread::spawn(move || runner.run())
}

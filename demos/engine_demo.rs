//! Engine demo
//!
//! Starts one scheduler per CPU (up to four), each mixing a custom fiber
//! worker, a nested worker and a passive worker behind a flaky data lock.
//! A timer thread broadcasts work for a while and then stops the engine.

use newcore::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Fiber worker that counts its frames and yields after every one
struct FrameCounter {
    frames: Arc<AtomicUsize>,
}

impl WorkerKind for FrameCounter {
    fn mode(&self) -> InterleaveMode {
        InterleaveMode::Fiber
    }

    fn can_accept_task(&self, category: &TaskCategory) -> bool {
        category.as_str() == "frame"
    }

    fn fiber_body(&mut self, ctx: WorkerContext) -> Option<FiberBody> {
        let frames = Arc::clone(&self.frames);
        Some(Box::pin(async move {
            while ctx.is_active() {
                frames.fetch_add(ctx.run_batch(), Ordering::Relaxed);
                ctx.suspend().await;
            }
        }))
    }

    fn name(&self) -> &'static str {
        "frame-counter"
    }
}

fn main() {
    println!("Demonstrating the newcore engine...\n");

    let engine = Engine::new(EngineConfig {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    });

    let frames = Arc::new(AtomicUsize::new(0));
    let jobs = Arc::new(AtomicUsize::new(0));
    let lock = Arc::new(FlakyLock::new(0.5));

    let schedulers = Engine::suggested_scheduler_count().min(4);
    for _ in 0..schedulers {
        let mut scheduler = Scheduler::new(SchedulerConfig {
            idle_sleep: Duration::from_millis(5),
            ..Default::default()
        });
        scheduler
            .add_worker(FrameCounter {
                frames: Arc::clone(&frames),
            })
            .expect("fresh scheduler accepts workers");
        scheduler
            .add_worker(BasicWorker::nested().accepting(["job"]))
            .expect("fresh scheduler accepts workers");
        scheduler
            .add_worker(BasicWorker::passive().accepting(["job"]).with_lock(lock.clone()))
            .expect("fresh scheduler accepts workers");

        let handle = engine
            .add_scheduler(scheduler)
            .expect("engine accepts schedulers before it runs");
        println!("Added scheduler {}", handle.id());
    }

    let timer = {
        let engine = engine.clone();
        let frames = Arc::clone(&frames);
        let jobs = Arc::clone(&jobs);
        thread::spawn(move || {
            for round in 0..10 {
                engine.broadcast_task(&Task::from_fn("frame", |_| {}));

                let jobs = Arc::clone(&jobs);
                let reached = engine.broadcast_task(&Task::from_fn("job", move |_| {
                    jobs.fetch_add(1, Ordering::Relaxed);
                }));
                println!("Round {}: broadcast to {} schedulers", round, reached);

                thread::sleep(Duration::from_millis(50));
            }

            println!("\nStopping engine...");
            engine.stop();
            println!(
                "Frames counted so far: {}",
                frames.load(Ordering::Relaxed)
            );
        })
    };

    if let Err(e) = engine.run() {
        eprintln!("engine failed: {}", e);
    }
    timer.join().expect("timer thread panicked");

    println!("\nEngine finished in state {}", engine.state());
    println!("Frames: {}", frames.load(Ordering::Relaxed));
    println!("Jobs:   {}", jobs.load(Ordering::Relaxed));
}

//! Top-level engine
//!
//! The engine owns every scheduler of the process. While running it polls its
//! schedulers at a fixed interval, starting each new one on a dedicated named
//! thread and removing the ones that have died. Once stopped, it asks every
//! running scheduler to stop and waits for all of them to die before
//! returning from [`Engine::run`].
//!
//! The engine never touches workers or tasks directly: it only observes
//! scheduler lifecycles and forwards tasks through [`SchedulerHandle`]s.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, SharedLifecycle};
use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerId};
use crate::task::Task;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often scheduler states are polled
    pub poll_interval: Duration,
    /// Thread name prefix for scheduler threads
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            thread_name_prefix: "newcore-scheduler".to_string(),
        }
    }
}

enum SchedulerEntry {
    /// Added but not started yet; owned by the engine
    Pending(Scheduler),
    /// Running on its own thread
    Running {
        handle: SchedulerHandle,
        thread: JoinHandle<()>,
    },
}

impl SchedulerEntry {
    fn handle(&self) -> SchedulerHandle {
        match self {
            SchedulerEntry::Pending(scheduler) => scheduler.handle(),
            SchedulerEntry::Running { handle, .. } => handle.clone(),
        }
    }
}

struct EngineInner {
    state: SharedLifecycle,
    config: EngineConfig,
    schedulers: Mutex<Vec<SchedulerEntry>>,
}

/// Owner of all schedulers.
///
/// Cloning is cheap and every clone refers to the same engine, so one thread
/// can block in [`Engine::run`] while others broadcast tasks or call
/// [`Engine::stop`].
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create a new engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        log::info!("engine initialized");

        Self {
            inner: Arc::new(EngineInner {
                state: SharedLifecycle::new(),
                config,
                schedulers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Number of logical CPUs, a sensible default scheduler count
    pub fn suggested_scheduler_count() -> usize {
        num_cpus::get().max(1)
    }

    /// Current lifecycle state
    pub fn state(&self) -> Lifecycle {
        self.inner.state.get()
    }

    /// Get the configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Hand `scheduler` over to the engine.
    ///
    /// It is started on its own thread at the next poll. Rejected once the
    /// engine is exiting or dead, and for schedulers that were already
    /// started.
    pub fn add_scheduler(&self, scheduler: Scheduler) -> Result<SchedulerHandle> {
        if matches!(self.state(), Lifecycle::Exiting | Lifecycle::Dead) {
            return Err(Error::ShuttingDown {
                target: "engine".to_string(),
            });
        }
        if scheduler.state() != Lifecycle::Ready {
            return Err(Error::InvalidState {
                operation: "add scheduler",
                state: scheduler.state().to_string(),
            });
        }

        let handle = scheduler.handle();
        log::info!("engine add the scheduler {}", handle.id());
        self.inner
            .schedulers
            .lock()
            .push(SchedulerEntry::Pending(scheduler));
        Ok(handle)
    }

    /// Give every owned scheduler its own copy of `task`.
    ///
    /// Returns the number of schedulers reached.
    pub fn broadcast_task(&self, task: &Task) -> usize {
        log::debug!("engine broadcast the task: {}", task);

        let schedulers = self.inner.schedulers.lock();
        for entry in schedulers.iter() {
            entry.handle().add_task(task);
        }
        schedulers.len()
    }

    /// Number of schedulers currently owned
    pub fn scheduler_count(&self) -> usize {
        self.inner.schedulers.lock().len()
    }

    /// Snapshot of owned schedulers and their states
    pub fn scheduler_states(&self) -> Vec<(SchedulerId, Lifecycle)> {
        self.inner
            .schedulers
            .lock()
            .iter()
            .map(|entry| {
                let handle = entry.handle();
                (handle.id(), handle.state())
            })
            .collect()
    }

    /// Run the engine on the calling thread until it has fully shut down
    pub fn run(&self) -> Result<()> {
        self.inner
            .state
            .transition(Lifecycle::Ready, Lifecycle::Active)
            .map_err(|state| Error::InvalidState {
                operation: "run engine",
                state: state.to_string(),
            })?;
        log::info!("engine running");

        let poll_interval = self.inner.config.poll_interval;

        while self.state() == Lifecycle::Active {
            thread::sleep(poll_interval);
            self.poll(false);
        }

        log::info!("engine stopping");

        while self.scheduler_count() > 0 {
            thread::sleep(poll_interval);
            self.poll(true);
        }

        self.inner.state.kill();
        log::info!("engine stopped");
        Ok(())
    }

    /// Request shutdown; only effective while running
    pub fn stop(&self) -> bool {
        let stopped = self
            .inner
            .state
            .transition(Lifecycle::Active, Lifecycle::Exiting)
            .is_ok();
        if stopped {
            log::info!("engine will stop soon");
        }
        stopped
    }

    /// Start new schedulers, reap finished ones, and once `exiting`, stop
    /// the active ones.
    ///
    /// The registry lock is held throughout, so nothing here may run
    /// scheduler code: schedulers only ever run on their own threads. A
    /// scheduler still pending at shutdown is started too and stopped at a
    /// later poll.
    fn poll(&self, exiting: bool) {
        let mut schedulers = self.inner.schedulers.lock();
        let mut kept = Vec::with_capacity(schedulers.len());

        for entry in schedulers.drain(..) {
            match entry {
                SchedulerEntry::Pending(scheduler) => {
                    if let Some(running) = self.spawn(scheduler) {
                        kept.push(running);
                    }
                }
                SchedulerEntry::Running { handle, thread } => {
                    if thread.is_finished() {
                        Self::reap(handle, thread);
                        continue;
                    }
                    if exiting && handle.state() == Lifecycle::Active {
                        handle.stop();
                    }
                    kept.push(SchedulerEntry::Running { handle, thread });
                }
            }
        }

        *schedulers = kept;
    }

    fn spawn(&self, mut scheduler: Scheduler) -> Option<SchedulerEntry> {
        let handle = scheduler.handle();
        let id = handle.id();
        let name = format!("{}-{}", self.inner.config.thread_name_prefix, id);

        let spawned = thread::Builder::new().name(name).spawn(move || {
            if let Err(e) = scheduler.run() {
                log::error!("scheduler {} failed: {}", id, e);
            }
        });

        match spawned {
            Ok(thread) => {
                log::info!("engine started scheduler {} on its own thread", id);
                Some(SchedulerEntry::Running { handle, thread })
            }
            Err(e) => {
                let error = Error::RuntimeError {
                    reason: format!("Failed to spawn scheduler thread: {}", e),
                };
                log::error!("engine dropped scheduler {}: {}", id, error);
                handle.mark_dead();
                None
            }
        }
    }

    fn reap(handle: SchedulerHandle, thread: JoinHandle<()>) {
        if handle.state() != Lifecycle::Dead {
            log::warn!(
                "scheduler {} thread exited while {}, marking it dead",
                handle.id(),
                handle.state()
            );
            handle.mark_dead();
        }

        if thread.join().is_err() {
            log::error!("scheduler {} thread panicked", handle.id());
        }
        log::info!("engine removed scheduler {}", handle.id());
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("schedulers", &self.scheduler_count())
            .finish()
    }
}

//! Fair-share scheduler
//!
//! A scheduler owns a set of workers and runs on one dedicated thread. Each
//! [`Scheduler::update`] tick fans inbound tasks out to workers, advances
//! worker lifecycles, then resumes exactly one worker: the one with the lowest
//! fairness score.
//!
//! Scores work like virtual time. A dispatched worker pays a large penalty,
//! every task routed to a worker adds a small increment, and while the
//! scheduler is active the minimum score is subtracted from all selectable
//! workers each tick so scores stay small without changing their order.

use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, SharedLifecycle};
use crate::task::Task;
use super::queue::InboundQueue;
use super::worker::{Worker, WorkerConfig, WorkerContext, WorkerId, WorkerKind, WorkerState};

/// Unique identifier for a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulerId(pub usize);

impl SchedulerId {
    fn next() -> Self {
        static SCHEDULER_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);
        SchedulerId(SCHEDULER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Score added to a worker for each task routed to it
    pub task_score: i64,
    /// Score added to a worker each time it is dispatched
    pub dispatch_penalty: i64,
    /// Consecutive empty-queue ticks before the scheduler naps
    pub idle_threshold: u32,
    /// Length of the idle nap
    pub idle_sleep: Duration,
    /// Maximum tasks a worker executes per batch
    pub batch_size: usize,
    /// Maximum depth of re-entrant updates driven by nested workers
    pub max_nesting_depth: usize,
    /// Catch panics raised by task payloads instead of unwinding the thread
    pub isolate_panics: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_score: 1,
            dispatch_penalty: 100,
            idle_threshold: 100,
            idle_sleep: Duration::from_millis(100),
            batch_size: 100,
            max_nesting_depth: 16,
            isolate_panics: true,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Number of update ticks, nested ones included
    pub ticks: u64,
    /// Tasks drained from the inbound queue
    pub tasks_received: u64,
    /// Task clones handed to workers
    pub tasks_delivered: u64,
    /// Workers selected for a turn
    pub dispatches: u64,
    /// Idle naps taken
    pub idle_sleeps: u64,
    /// Workers currently owned
    pub workers: usize,
}

#[derive(Debug)]
struct SchedulerShared {
    id: SchedulerId,
    state: SharedLifecycle,
    inbound: InboundQueue,
}

/// Thread-safe handle to a scheduler.
///
/// Stays valid after the scheduler has moved to its own thread.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
}

impl SchedulerHandle {
    /// Get scheduler ID
    pub fn id(&self) -> SchedulerId {
        self.shared.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> Lifecycle {
        self.shared.state.get()
    }

    /// Queue a copy of `task` for fan-out on the scheduler's next tick
    pub fn add_task(&self, task: &Task) {
        log::debug!("scheduler {} receive the task: {}", self.shared.id, task);
        self.shared.inbound.push(task.clone());
    }

    /// Request shutdown; only effective while active
    pub fn stop(&self) -> bool {
        let stopped = self
            .shared
            .state
            .transition(Lifecycle::Active, Lifecycle::Exiting)
            .is_ok();
        if stopped {
            log::info!("scheduler {} will stop soon", self.shared.id);
        }
        stopped
    }

    /// Tasks waiting for fan-out
    pub fn pending_tasks(&self) -> usize {
        self.shared.inbound.len()
    }

    pub(crate) fn mark_dead(&self) {
        self.shared.state.kill();
    }
}

struct WorkerSlot {
    id: WorkerId,
    /// `None` while the worker is being resumed further up the stack
    worker: Option<Worker>,
    /// Shared with the worker; reachable even while it is detached
    ctx: WorkerContext,
    score: i64,
}

impl WorkerSlot {
    fn is_schedulable(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| worker.state().is_schedulable())
    }
}

/// A set of cooperatively interleaved workers driven by one thread
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    config: SchedulerConfig,
    slots: Vec<WorkerSlot>,
    next_seq: u32,
    idle_ticks: u32,
    depth: usize,
    stats: SchedulerStats,
}

impl Scheduler {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        let id = SchedulerId::next();
        log::debug!("scheduler {} initialized", id);

        Self {
            shared: Arc::new(SchedulerShared {
                id,
                state: SharedLifecycle::new(),
                inbound: InboundQueue::new(),
            }),
            config,
            slots: Vec::new(),
            next_seq: 0,
            idle_ticks: 0,
            depth: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Get scheduler ID
    pub fn id(&self) -> SchedulerId {
        self.shared.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> Lifecycle {
        self.shared.state.get()
    }

    /// Whether shutdown has been requested and is in progress
    pub fn is_exiting(&self) -> bool {
        self.state() == Lifecycle::Exiting
    }

    /// Thread-safe handle for adding tasks and stopping
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a worker built from `kind`
    pub fn add_worker<K: WorkerKind>(&mut self, kind: K) -> Result<WorkerId> {
        self.add_boxed_worker(Box::new(kind))
    }

    /// Register a worker built from a boxed `kind`.
    ///
    /// Rejected once the scheduler is exiting or dead.
    pub fn add_boxed_worker(&mut self, kind: Box<dyn WorkerKind>) -> Result<WorkerId> {
        if matches!(self.state(), Lifecycle::Exiting | Lifecycle::Dead) {
            return Err(Error::ShuttingDown {
                target: format!("scheduler {}", self.id()),
            });
        }

        self.next_seq += 1;
        let id = WorkerId {
            scheduler: self.id(),
            seq: self.next_seq,
        };
        let worker_config = WorkerConfig {
            batch_size: self.config.batch_size,
            isolate_panics: self.config.isolate_panics,
        };

        let worker = Worker::new(id, kind, worker_config);
        log::debug!("scheduler {} add worker <{}> ({})", self.id(), id, worker.name());

        self.slots.push(WorkerSlot {
            id,
            ctx: worker.context().clone(),
            worker: Some(worker),
            score: 0,
        });
        Ok(id)
    }

    /// Queue a copy of `task`; see [`SchedulerHandle::add_task`]
    pub fn add_task(&self, task: &Task) {
        self.handle().add_task(task);
    }

    /// Move from ready to active without entering the run loop
    pub fn start(&self) -> Result<()> {
        self.shared
            .state
            .transition(Lifecycle::Ready, Lifecycle::Active)
            .map_err(|state| Error::InvalidState {
                operation: "start scheduler",
                state: state.to_string(),
            })?;

        log::info!("scheduler {} running", self.id());
        Ok(())
    }

    /// Thread entry point: start, then tick until dead
    pub fn run(&mut self) -> Result<()> {
        self.start()?;

        while self.state() != Lifecycle::Dead {
            self.update();
        }

        log::info!(
            "scheduler {} stopped after {} ticks and {} dispatches",
            self.id(),
            self.stats.ticks,
            self.stats.dispatches
        );
        Ok(())
    }

    /// Request shutdown; only effective while active
    pub fn stop(&self) -> bool {
        self.handle().stop()
    }

    /// Start if needed, stop, and tick on the calling thread until dead
    pub fn shutdown(&mut self) {
        if self.state() == Lifecycle::Ready {
            self.start().ok();
        }
        self.stop();

        while self.state() != Lifecycle::Dead {
            self.update();
        }
    }

    /// One scheduling step: fan out tasks, advance lifecycles, resume one worker
    pub fn update(&mut self) {
        self.stats.ticks += 1;

        self.update_queue();
        self.update_workers();

        if let Some(id) = self.next_worker() {
            let penalty = self.config.dispatch_penalty;
            if let Some(slot) = self.slot_mut(id) {
                slot.score += penalty;
            }
            self.stats.dispatches += 1;
            self.resume_worker(id);
        }
    }

    /// Look up an owned worker.
    ///
    /// Returns `None` for unknown workers and for the worker currently being
    /// resumed.
    pub fn worker(&self, id: WorkerId) -> Option<&Worker> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .and_then(|slot| slot.worker.as_ref())
    }

    /// Owned workers in registration order
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.slots.iter().filter_map(|slot| slot.worker.as_ref())
    }

    /// Current fairness score of a worker
    pub fn score(&self, id: WorkerId) -> Option<i64> {
        self.slots.iter().find(|slot| slot.id == id).map(|slot| slot.score)
    }

    /// Get the number of workers
    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            workers: self.slots.len(),
            ..self.stats
        }
    }

    /// Enter a re-entrant update on behalf of a nested worker
    pub(crate) fn enter_nested(&mut self) -> bool {
        if self.depth >= self.config.max_nesting_depth {
            return false;
        }
        self.depth += 1;
        true
    }

    pub(crate) fn leave_nested(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn update_queue(&mut self) {
        if self.idle_ticks >= self.config.idle_threshold {
            if !self.config.idle_sleep.is_zero() {
                thread::sleep(self.config.idle_sleep);
            }
            self.idle_ticks = 0;
            self.stats.idle_sleeps += 1;
        }

        let tasks = self.shared.inbound.drain();
        if tasks.is_empty() {
            self.idle_ticks += 1;
            return;
        }
        self.idle_ticks = 0;

        let task_score = self.config.task_score;
        for task in &tasks {
            self.stats.tasks_received += 1;

            for slot in &mut self.slots {
                if slot.ctx.offer(task.clone()) {
                    slot.score += task_score;
                    self.stats.tasks_delivered += 1;
                }
            }
        }
    }

    fn update_workers(&mut self) {
        let before = self.slots.len();
        self.slots.retain(|slot| {
            slot.worker
                .as_ref()
                .map_or(true, |worker| worker.state() != WorkerState::Dead)
        });
        if self.slots.len() < before {
            log::debug!(
                "scheduler {} removed {} dead workers",
                self.id(),
                before - self.slots.len()
            );
        }

        let ready: Vec<WorkerId> = self
            .slots
            .iter()
            .filter(|slot| {
                slot.worker
                    .as_ref()
                    .is_some_and(|worker| worker.state() == WorkerState::Ready)
            })
            .map(|slot| slot.id)
            .collect();
        for id in ready {
            self.resume_worker(id);
        }

        match self.state() {
            Lifecycle::Active => self.normalize_scores(),
            Lifecycle::Exiting => {
                for worker in self.slots.iter().filter_map(|slot| slot.worker.as_ref()) {
                    worker.stop();
                }

                if self.slots.is_empty()
                    && self
                        .shared
                        .state
                        .transition(Lifecycle::Exiting, Lifecycle::Dead)
                        .is_ok()
                {
                    log::info!("scheduler {} stopped", self.id());
                }
            }
            Lifecycle::Ready | Lifecycle::Dead => {}
        }
    }

    fn normalize_scores(&mut self) {
        let min = self
            .slots
            .iter()
            .filter(|slot| slot.is_schedulable())
            .map(|slot| slot.score)
            .min();

        if let Some(min) = min {
            for slot in self.slots.iter_mut().filter(|slot| slot.is_schedulable()) {
                slot.score -= min;
            }
        }
    }

    fn next_worker(&self) -> Option<WorkerId> {
        self.slots
            .iter()
            .filter(|slot| slot.is_schedulable())
            .min_by_key(|slot| slot.score)
            .map(|slot| slot.id)
    }

    /// Detach the worker from its slot for the duration of its turn, so that a
    /// nested worker can drive `update` re-entrantly.
    fn resume_worker(&mut self, id: WorkerId) {
        let Some(mut worker) = self.slot_mut(id).and_then(|slot| slot.worker.take()) else {
            return;
        };

        worker.resume(self);

        match self.slots.iter_mut().find(|slot| slot.id == id) {
            Some(slot) => slot.worker = Some(worker),
            None => log::warn!("scheduler {} lost the slot of worker <{}>", self.shared.id, id),
        }
    }

    fn slot_mut(&mut self, id: WorkerId) -> Option<&mut WorkerSlot> {
        self.slots.iter_mut().find(|slot| slot.id == id)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("workers", &self.slots.len())
            .field("depth", &self.depth)
            .finish()
    }
}

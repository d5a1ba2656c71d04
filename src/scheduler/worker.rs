//! Cooperatively scheduled workers
//!
//! A worker owns a private FIFO task queue and is given turns by its scheduler
//! through [`Worker::resume`]. How a turn is spent depends on the worker's
//! [`InterleaveMode`]:
//!
//! - **Fiber**: the worker's logic is a suspended future that is polled once
//!   per turn and yields wherever it awaits [`WorkerContext::suspend`].
//! - **Nested**: the worker never yields; its suspension point instead drives
//!   the owning scheduler one step forward re-entrantly.
//! - **Passive**: each turn processes one bounded batch of tasks.

use std::collections::VecDeque;
use std::fmt::{self, Debug, Display};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::Poll;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::data::{DataLock, SharedData};
use crate::task::{Task, TaskCategory};
use super::core::{Scheduler, SchedulerId};
use super::fiber::Fiber;

/// Unique identifier for a worker
///
/// Unique process-wide because scheduler ids are, and the sequence number is
/// allocated by the owning scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId {
    /// Owning scheduler
    pub scheduler: SchedulerId,
    /// Registration sequence within that scheduler
    pub seq: u32,
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scheduler.as_usize(), self.seq)
    }
}

/// How a worker interleaves with the other workers of its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterleaveMode {
    /// Self-yielding coroutine
    Fiber,
    /// Drives the scheduler re-entrantly at its suspension points
    Nested,
    /// Runs one bounded batch per turn
    Passive,
}

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Registered, not yet resumed
    Ready,
    /// Running
    Active,
    /// Active, but currently driving a nested scheduler step
    Paused,
    /// Stop requested; the next resume finishes the worker
    Exiting,
    /// Finished
    Dead,
}

impl WorkerState {
    /// Whether the scheduler may select this worker for a turn
    pub fn is_schedulable(&self) -> bool {
        matches!(self, WorkerState::Active | WorkerState::Exiting)
    }
}

/// Statistics for a worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Number of times the worker was resumed
    pub resumes: u64,
    /// Number of tasks accepted into the queue
    pub tasks_received: u64,
    /// Number of tasks executed
    pub tasks_run: u64,
    /// Number of failed data lock acquisitions
    pub lock_misses: u64,
    /// Number of tasks whose payload panicked
    pub task_panics: u64,
}

/// Execution settings handed down from the scheduler
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Maximum tasks executed per batch
    pub batch_size: usize,
    /// Catch panics raised by task payloads
    pub isolate_panics: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            isolate_panics: true,
        }
    }
}

/// Custom logic of a fiber-mode worker
pub type FiberBody = BoxFuture<'static, ()>;

/// Behaviour of a concrete worker.
///
/// Everything has a default, so a unit struct implementing this trait is a
/// passive worker accepting every task.
pub trait WorkerKind: Send + 'static {
    /// Interleaving mode, queried once at registration
    fn mode(&self) -> InterleaveMode {
        InterleaveMode::Passive
    }

    /// Whether tasks of `category` should be routed to this worker
    fn can_accept_task(&self, _category: &TaskCategory) -> bool {
        true
    }

    /// Data lock for locked execution, queried once at registration.
    ///
    /// `None` runs tasks directly.
    fn data_lock(&self) -> Option<Arc<dyn DataLock>> {
        None
    }

    /// Runs once when the worker starts
    fn on_start(&mut self) {}

    /// Runs once when the worker finishes, before its queue is cleared
    fn on_finish(&mut self) {}

    /// Custom fiber logic.
    ///
    /// Called on the first resume of a fiber-mode worker. The returned future
    /// must not call back into `ctx` synchronously from this method, only from
    /// inside the future. `None` uses the standard loop: run a batch, suspend,
    /// repeat while active.
    fn fiber_body(&mut self, _ctx: WorkerContext) -> Option<FiberBody> {
        None
    }

    /// Name used in logs
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

struct WorkerInner {
    state: WorkerState,
    queue: VecDeque<Task>,
    stats: WorkerStats,
    finished: bool,
}

struct WorkerShared {
    kind: Mutex<Box<dyn WorkerKind>>,
    inner: Mutex<WorkerInner>,
}

/// Handle to a worker's queue and state.
///
/// Fiber bodies receive one to run tasks and to suspend. Every method locks
/// only briefly, so the handle is never locked across a suspension.
#[derive(Clone)]
pub struct WorkerContext {
    id: WorkerId,
    shared: Arc<WorkerShared>,
    lock: Option<Arc<dyn DataLock>>,
    config: WorkerConfig,
}

impl WorkerContext {
    fn new(id: WorkerId, kind: Box<dyn WorkerKind>, config: WorkerConfig) -> Self {
        let lock = kind.data_lock();
        Self {
            id,
            shared: Arc::new(WorkerShared {
                kind: Mutex::new(kind),
                inner: Mutex::new(WorkerInner {
                    state: WorkerState::Ready,
                    queue: VecDeque::new(),
                    stats: WorkerStats::default(),
                    finished: false,
                }),
            }),
            lock,
            config,
        }
    }

    /// Get worker ID
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        self.shared.inner.lock().state
    }

    /// Whether the worker is still active
    pub fn is_active(&self) -> bool {
        self.state() == WorkerState::Active
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// Execute the task at the head of the queue.
    ///
    /// Returns `false` without consuming anything when the queue is empty or
    /// the task's data could not be locked.
    pub fn run_task(&self) -> bool {
        let (mut task, data) = {
            let mut inner = self.shared.inner.lock();
            let Some(task) = inner.queue.pop_front() else {
                return false;
            };

            let data = match &self.lock {
                None => None,
                Some(lock) => match lock.try_acquire(task.category()) {
                    Some(data) => Some(data),
                    None => {
                        log::trace!("worker <{}> lock data failed for {}", self.id, task);
                        inner.queue.push_front(task);
                        inner.stats.lock_misses += 1;
                        return false;
                    }
                },
            };
            (task, data)
        };

        let panicked = self.execute(&mut task, data.as_ref());

        if let Some(lock) = &self.lock {
            lock.release(task.category());
        }

        let mut inner = self.shared.inner.lock();
        inner.stats.tasks_run += 1;
        if panicked {
            inner.stats.task_panics += 1;
        }
        true
    }

    /// Run up to one batch of tasks, stopping at the first failed attempt.
    ///
    /// Returns the number of tasks executed.
    pub fn run_batch(&self) -> usize {
        let mut executed = 0;
        while executed < self.config.batch_size && self.run_task() {
            executed += 1;
        }
        executed
    }

    /// Yield control back to whoever resumed this fiber
    pub async fn suspend(&self) {
        let mut yielded = false;
        std::future::poll_fn(move |cx| {
            if yielded {
                Poll::Ready(())
            } else {
                yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }

    fn execute(&self, task: &mut Task, data: Option<&SharedData>) -> bool {
        log::trace!("worker <{}> runs {}", self.id, task);

        if !self.config.isolate_panics {
            task.run(data);
            return false;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| task.run(data))) {
            Ok(()) => false,
            Err(_) => {
                log::error!("worker <{}>: {} panicked, dropping it", self.id, task);
                true
            }
        }
    }

    pub(crate) fn accepts(&self, category: &TaskCategory) -> bool {
        self.shared.kind.lock().can_accept_task(category)
    }

    /// Queue `task` unless its category is refused.
    ///
    /// Works while the owning [`Worker`] is detached from its scheduler slot.
    pub(crate) fn offer(&self, task: Task) -> bool {
        if !self.accepts(task.category()) {
            return false;
        }

        log::trace!("worker <{}> receive the task: {}", self.id, task);
        let mut inner = self.shared.inner.lock();
        inner.queue.push_back(task);
        inner.stats.tasks_received += 1;
        true
    }

    pub(crate) fn run_before(&self) {
        log::debug!("worker <{}> run before", self.id);
        self.shared.kind.lock().on_start();
    }

    /// Runs the finish hook and clears the queue, once
    pub(crate) fn run_after(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
        }

        log::debug!("worker <{}> run after", self.id);
        self.shared.kind.lock().on_finish();

        let mut inner = self.shared.inner.lock();
        let dropped = inner.queue.len();
        inner.queue.clear();
        if dropped > 0 {
            log::debug!("worker <{}> dropped {} pending tasks", self.id, dropped);
        }
    }

    fn fiber_body(&self) -> Option<FiberBody> {
        self.shared.kind.lock().fiber_body(self.clone())
    }

    fn set_state(&self, state: WorkerState) {
        self.shared.inner.lock().state = state;
    }

    /// Move `from` → `to` if currently in `from`
    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state == from {
            inner.state = to;
            true
        } else {
            false
        }
    }
}

impl Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// A worker bound to one scheduler
pub struct Worker {
    id: WorkerId,
    mode: InterleaveMode,
    name: &'static str,
    ctx: WorkerContext,
    fiber: Option<Fiber>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, kind: Box<dyn WorkerKind>, config: WorkerConfig) -> Self {
        let mode = kind.mode();
        let name = kind.name();
        log::debug!("worker <{}> ({}, {:?}) initialized", id, name, mode);

        Self {
            id,
            mode,
            name,
            ctx: WorkerContext::new(id, kind, config),
            fiber: None,
        }
    }

    /// Get worker ID
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Get interleaving mode
    pub fn mode(&self) -> InterleaveMode {
        self.mode
    }

    /// Name of the worker kind
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the current state of the worker
    pub fn state(&self) -> WorkerState {
        self.ctx.state()
    }

    /// Get worker statistics
    pub fn stats(&self) -> WorkerStats {
        self.ctx.shared.inner.lock().stats
    }

    /// Number of queued tasks
    pub fn pending_tasks(&self) -> usize {
        self.ctx.pending()
    }

    /// Handle to this worker's queue and state
    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Whether tasks of `category` are routed to this worker
    pub fn can_accept_task(&self, category: &TaskCategory) -> bool {
        self.ctx.accepts(category)
    }

    /// Queue `task` if this worker accepts its category.
    ///
    /// Returns whether the task was queued.
    pub fn add_task(&self, task: Task) -> bool {
        self.ctx.offer(task)
    }

    /// Request cooperative shutdown.
    ///
    /// Only effective while active (or paused); returns whether it took effect.
    pub fn stop(&self) -> bool {
        let mut inner = self.ctx.shared.inner.lock();
        match inner.state {
            WorkerState::Active | WorkerState::Paused => {
                inner.state = WorkerState::Exiting;
                drop(inner);
                log::debug!("worker <{}> will stop soon", self.id);
                true
            }
            _ => false,
        }
    }

    /// Give the worker a turn
    pub(crate) fn resume(&mut self, scheduler: &mut Scheduler) {
        self.ctx.shared.inner.lock().stats.resumes += 1;

        match self.state() {
            WorkerState::Ready => {
                self.ctx.set_state(WorkerState::Active);
                log::debug!("worker <{}> starts running", self.id);

                match self.mode {
                    InterleaveMode::Fiber => {
                        let body = self.ctx.fiber_body();
                        self.fiber = Some(Fiber::new(&self.ctx, body));
                        self.poll_fiber();
                    }
                    InterleaveMode::Nested | InterleaveMode::Passive => self.ctx.run_before(),
                }
            }
            WorkerState::Active => match self.mode {
                InterleaveMode::Fiber => self.poll_fiber(),
                InterleaveMode::Nested => self.run_nested(scheduler),
                InterleaveMode::Passive => {
                    self.ctx.run_batch();
                }
            },
            WorkerState::Exiting => {
                log::debug!("worker <{}> is cleaning up", self.id);

                if let Some(mut fiber) = self.fiber.take() {
                    if !fiber.resume() {
                        log::debug!("worker <{}> abandons its unfinished fiber", self.id);
                    }
                }
                self.ctx.run_after();

                self.ctx.set_state(WorkerState::Dead);
                log::debug!("worker <{}> finishes", self.id);
            }
            WorkerState::Paused | WorkerState::Dead => {}
        }
    }

    fn poll_fiber(&mut self) {
        let Some(fiber) = self.fiber.as_mut() else {
            return;
        };

        if fiber.resume() && self.ctx.transition(WorkerState::Active, WorkerState::Exiting) {
            log::debug!("worker <{}> fiber returned, exiting", self.id);
        }
    }

    /// Blocking run loop of a nested worker
    fn run_nested(&mut self, scheduler: &mut Scheduler) {
        loop {
            self.ctx.run_batch();

            if !self.suspend_nested(scheduler) {
                break;
            }
            if self.state() != WorkerState::Active {
                break;
            }
        }
    }

    /// Drive the scheduler one step in place of yielding.
    ///
    /// Returns `false` when the nesting limit is reached; the worker then
    /// returns to its caller instead.
    fn suspend_nested(&mut self, scheduler: &mut Scheduler) -> bool {
        if !scheduler.enter_nested() {
            log::trace!("worker <{}> hit the nesting limit, yielding", self.id);
            return false;
        }

        self.ctx.transition(WorkerState::Active, WorkerState::Paused);
        scheduler.update();
        scheduler.leave_nested();

        if scheduler.is_exiting() {
            self.stop();
        }
        self.ctx.transition(WorkerState::Paused, WorkerState::Active);
        true
    }
}

impl Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

/// Ready-made worker kind configured by value
pub struct BasicWorker {
    mode: InterleaveMode,
    accepts: Option<Vec<TaskCategory>>,
    lock: Option<Arc<dyn DataLock>>,
}

impl BasicWorker {
    /// Worker with the given mode accepting every task
    pub fn new(mode: InterleaveMode) -> Self {
        Self {
            mode,
            accepts: None,
            lock: None,
        }
    }

    /// Passive worker accepting every task
    pub fn passive() -> Self {
        Self::new(InterleaveMode::Passive)
    }

    /// Fiber worker accepting every task
    pub fn fiber() -> Self {
        Self::new(InterleaveMode::Fiber)
    }

    /// Nested worker accepting every task
    pub fn nested() -> Self {
        Self::new(InterleaveMode::Nested)
    }

    /// Restrict accepted tasks to `categories`
    pub fn accepting<I, C>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<TaskCategory>,
    {
        self.accepts = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    /// Execute tasks under `lock`
    pub fn with_lock(mut self, lock: Arc<dyn DataLock>) -> Self {
        self.lock = Some(lock);
        self
    }
}

impl WorkerKind for BasicWorker {
    fn mode(&self) -> InterleaveMode {
        self.mode
    }

    fn can_accept_task(&self, category: &TaskCategory) -> bool {
        self.accepts
            .as_ref()
            .map_or(true, |accepts| accepts.contains(category))
    }

    fn data_lock(&self) -> Option<Arc<dyn DataLock>> {
        self.lock.clone()
    }

    fn name(&self) -> &'static str {
        match self.mode {
            InterleaveMode::Fiber => "basic-fiber",
            InterleaveMode::Nested => "basic-nested",
            InterleaveMode::Passive => "basic-passive",
        }
    }
}

//! Cooperative schedulers and their workers
//!
//! A [`Scheduler`] runs on one OS thread and interleaves its [`Worker`]s
//! cooperatively, picking the least recently favoured worker each tick.

pub mod core;
pub mod fiber;
pub mod queue;
pub mod worker;

pub use self::core::{Scheduler, SchedulerConfig, SchedulerHandle, SchedulerId, SchedulerStats};
pub use fiber::standard_loop;
pub use queue::InboundQueue;
pub use worker::{
    BasicWorker, FiberBody, InterleaveMode, Worker, WorkerConfig, WorkerContext, WorkerId,
    WorkerKind, WorkerState, WorkerStats,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;

    #[test]
    fn test_scheduler_creation() {
        let mut scheduler = Scheduler::default();
        assert_eq!(scheduler.state(), Lifecycle::Ready);

        let id = scheduler.add_worker(BasicWorker::passive());
        assert!(id.is_ok());
        assert_eq!(scheduler.worker_count(), 1);
    }
}

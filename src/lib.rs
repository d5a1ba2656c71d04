//! # newcore
//!
//! A cooperative multi-worker task scheduling engine.
//!
//! ## Overview
//!
//! - **Tasks**: opaque, cloneable units of work routed by category
//! - **Workers**: cooperatively scheduled contexts with a private FIFO queue,
//!   running as fibers, nested scheduler drivers, or passive batch processors
//! - **Schedulers**: one OS thread each, resuming the least recently favoured
//!   worker every tick
//! - **Engine**: starts a thread per scheduler, broadcasts tasks, and drives
//!   orderly shutdown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use newcore::prelude::*;
//! use std::thread;
//! use std::time::Duration;
//!
//! let engine = Engine::default();
//!
//! let mut scheduler = Scheduler::default();
//! scheduler.add_worker(BasicWorker::passive()).unwrap();
//! scheduler.add_worker(BasicWorker::fiber().accepting(["render"])).unwrap();
//! engine.add_scheduler(scheduler).unwrap();
//!
//! let stopper = engine.clone();
//! thread::spawn(move || {
//!     stopper.broadcast_task(&Task::from_fn("render", |_| println!("frame")));
//!     thread::sleep(Duration::from_secs(1));
//!     stopper.stop();
//! });
//!
//! engine.run().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod data;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod scheduler;
pub mod task;

/// Convenient re-exports for common functionality
pub mod prelude {
    pub use crate::data::{DataLock, DataRegistry, FlakyLock, SharedData};
    pub use crate::engine::{Engine, EngineConfig};
    pub use crate::error::{Error, Result};
    pub use crate::lifecycle::Lifecycle;
    pub use crate::scheduler::{
        BasicWorker, FiberBody, InterleaveMode, Scheduler, SchedulerConfig, SchedulerHandle,
        WorkerContext, WorkerId, WorkerKind, WorkerState,
    };
    pub use crate::task::{Task, TaskCategory, TaskId, TaskPayload};
}

// Re-export the prelude at crate root for convenience
pub use prelude::*;

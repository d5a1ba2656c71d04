//! Shared data ownership for locked task execution
//!
//! Workers that execute tasks in locked mode ask a [`DataLock`] for the data
//! belonging to a task's category before running it. Acquisition never
//! blocks: a miss simply leaves the task at the head of the worker's queue
//! until a later turn.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::task::TaskCategory;

/// Handle to the data a task operates on
pub type SharedData = Arc<dyn Any + Send + Sync>;

/// Non-blocking, category-keyed exclusive access to shared data
pub trait DataLock: Send + Sync {
    /// Try to take exclusive ownership of the data for `category`
    fn try_acquire(&self, category: &TaskCategory) -> Option<SharedData>;

    /// Give back ownership taken by a successful [`DataLock::try_acquire`]
    fn release(&self, category: &TaskCategory);
}

/// Registry that hands out each category's data to at most one holder at a time.
///
/// Safe to share between schedulers running on different threads. Categories
/// without registered data are acquirable and yield an empty unit handle.
#[derive(Default)]
pub struct DataRegistry {
    data: Mutex<HashMap<TaskCategory, SharedData>>,
    held: Mutex<HashSet<TaskCategory>>,
    contention: AtomicUsize,
}

impl DataRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the data guarded for `category`, replacing any previous entry
    pub fn insert(&self, category: impl Into<TaskCategory>, data: SharedData) {
        self.data.lock().insert(category.into(), data);
    }

    /// Whether `category` is currently held
    pub fn is_held(&self, category: &TaskCategory) -> bool {
        self.held.lock().contains(category)
    }

    /// Number of failed acquisitions so far
    pub fn contention(&self) -> usize {
        self.contention.load(Ordering::Relaxed)
    }
}

impl DataLock for DataRegistry {
    fn try_acquire(&self, category: &TaskCategory) -> Option<SharedData> {
        let mut held = self.held.lock();
        if !held.insert(category.clone()) {
            self.contention.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        drop(held);

        let data = self
            .data
            .lock()
            .get(category)
            .cloned()
            .unwrap_or_else(|| Arc::new(()));
        Some(data)
    }

    fn release(&self, category: &TaskCategory) {
        if !self.held.lock().remove(category) {
            log::warn!("release of data category '{}' that was not held", category);
        }
    }
}

/// Lock that succeeds with a fixed probability.
///
/// Used to exercise the retry path of locked execution in demos and stress
/// tests.
#[derive(Debug)]
pub struct FlakyLock {
    success_rate: f64,
}

impl FlakyLock {
    /// Create a lock that succeeds with probability `success_rate`.
    ///
    /// The rate is clamped to `0..=1`; NaN is treated as 0 (never succeeds).
    pub fn new(success_rate: f64) -> Self {
        let success_rate = if success_rate.is_nan() {
            0.0
        } else {
            success_rate.clamp(0.0, 1.0)
        };
        Self { success_rate }
    }
}

impl DataLock for FlakyLock {
    fn try_acquire(&self, category: &TaskCategory) -> Option<SharedData> {
        if rand::thread_rng().gen_bool(self.success_rate) {
            log::trace!("locked data for category '{}'", category);
            Some(Arc::new(()))
        } else {
            log::trace!("lock data failed for category '{}'", category);
            None
        }
    }

    fn release(&self, _category: &TaskCategory) {}
}

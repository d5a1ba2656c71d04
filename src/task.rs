//! Opaque units of work
//!
//! A [`Task`] pairs a [`TaskCategory`] with a boxed [`TaskPayload`]. The core
//! never looks inside the payload: it only routes tasks by category and calls
//! [`Task::run`].

use std::borrow::Cow;
use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::data::SharedData;

/// Unique identifier of a task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    fn next() -> Self {
        static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task<{}>", self.0)
    }
}

/// Label used for acceptance filtering and data locking
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskCategory(Cow<'static, str>);

impl TaskCategory {
    /// Category from a static label
    pub const fn new(name: &'static str) -> Self {
        TaskCategory(Cow::Borrowed(name))
    }

    /// Category from an owned label
    pub fn owned(name: impl Into<String>) -> Self {
        TaskCategory(Cow::Owned(name.into()))
    }

    /// The label
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TaskCategory {
    fn from(name: &'static str) -> Self {
        TaskCategory::new(name)
    }
}

/// The effect a task performs.
///
/// `data` is the handle returned by the worker's data lock when the worker uses
/// locked execution, and `None` otherwise.
pub trait TaskPayload: Send + 'static {
    /// Execute the payload
    fn run(&mut self, data: Option<&SharedData>);

    /// Produce an independent copy of this payload
    fn clone_box(&self) -> Box<dyn TaskPayload>;
}

impl<F> TaskPayload for F
where
    F: FnMut(Option<&SharedData>) + Clone + Send + 'static,
{
    fn run(&mut self, data: Option<&SharedData>) {
        self(data)
    }

    fn clone_box(&self) -> Box<dyn TaskPayload> {
        Box::new(self.clone())
    }
}

/// A unit of work routed through engines, schedulers and workers
pub struct Task {
    id: TaskId,
    category: TaskCategory,
    payload: Box<dyn TaskPayload>,
}

impl Task {
    /// Create a new task
    pub fn new(category: impl Into<TaskCategory>, payload: Box<dyn TaskPayload>) -> Self {
        Self {
            id: TaskId::next(),
            category: category.into(),
            payload,
        }
    }

    /// Create a task from a closure
    pub fn from_fn<F>(category: impl Into<TaskCategory>, f: F) -> Self
    where
        F: FnMut(Option<&SharedData>) + Clone + Send + 'static,
    {
        Self::new(category, Box::new(f))
    }

    /// Execute the task
    pub fn run(&mut self, data: Option<&SharedData>) {
        self.payload.run(data);
    }

    /// Get task ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get task category
    pub fn category(&self) -> &TaskCategory {
        &self.category
    }

    /// Create a no-op task for testing
    #[cfg(test)]
    pub fn dummy(category: &'static str) -> Self {
        Self::from_fn(category, |_| {})
    }
}

impl Clone for Task {
    /// Copies carry the same category and an independent payload, but are
    /// distinct instances with their own id.
    fn clone(&self) -> Self {
        Self {
            id: TaskId::next(),
            category: self.category.clone(),
            payload: self.payload.clone_box(),
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish()
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_task_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut task = Task::from_fn("a", move |_| {
            counter_clone.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(task.category().as_str(), "a");
        task.run(None);
        task.run(None);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_ids_increase() {
        let first = Task::dummy("a");
        let second = Task::dummy("a");
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_clone_gets_fresh_id() {
        let original = Task::dummy("b");
        let copy = original.clone();

        assert_ne!(original.id(), copy.id());
        assert!(copy.id() > original.id());
        assert_eq!(original.category(), copy.category());
    }

    #[test]
    fn test_clone_payload_is_independent() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let mut local = 0usize;

        let mut task = Task::from_fn("c", move |_| {
            local += 1;
            seen_clone.store(local, Ordering::Relaxed);
        });

        task.run(None);
        task.run(None);
        assert_eq!(seen.load(Ordering::Relaxed), 2);

        // The copy was taken after two runs, so its local counter starts at 2.
        let mut copy = task.clone();
        copy.run(None);
        assert_eq!(seen.load(Ordering::Relaxed), 3);

        // The original keeps its own count.
        task.run(None);
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }
}

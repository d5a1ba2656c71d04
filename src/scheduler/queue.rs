//! Inbound task queue of a scheduler
//!
//! The only scheduler structure touched from other threads: any thread may
//! push, only the scheduler's own thread drains.

use crossbeam::queue::SegQueue;

use crate::task::Task;

/// Lock-free multi-producer queue of tasks waiting for fan-out
#[derive(Debug, Default)]
pub struct InboundQueue {
    queue: SegQueue<Task>,
}

impl InboundQueue {
    /// Create a new inbound queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a task
    pub fn push(&self, task: Task) {
        self.queue.push(task);
    }

    /// Pop a task
    pub fn pop(&self) -> Option<Task> {
        self.queue.pop()
    }

    /// Take every task queued so far, in push order
    pub fn drain(&self) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Some(task) = self.pop() {
            tasks.push(task);
        }
        tasks
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending tasks; a snapshot while producers are pushing
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_preserves_order() {
        let queue = InboundQueue::new();
        assert!(queue.is_empty());

        let ids: Vec<_> = (0..5)
            .map(|_| {
                let task = Task::dummy("a");
                let id = task.id();
                queue.push(task);
                id
            })
            .collect();

        assert_eq!(queue.len(), 5);
        let drained: Vec<_> = queue.drain().iter().map(Task::id).collect();
        assert_eq!(drained, ids);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(InboundQueue::new());

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..250 {
                        queue.push(Task::dummy("a"));
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(queue.drain().len(), 1000);
    }

    #[test]
    fn test_len_stays_bounded_while_draining() {
        let queue = Arc::new(InboundQueue::new());

        let producers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        queue.push(Task::dummy("a"));
                    }
                })
            })
            .collect();

        let mut drained = 0;
        while producers.iter().any(|producer| !producer.is_finished()) {
            assert!(queue.len() <= 6_000);
            drained += queue.drain().len();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drained += queue.drain().len();

        assert_eq!(drained, 6_000);
        assert_eq!(queue.len(), 0);
    }
}

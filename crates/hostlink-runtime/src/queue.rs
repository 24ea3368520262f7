//! Task queue - multi-producer FIFO drained by a single loop thread

use std::collections::VecDeque;

use hostlink_core::{ErrorSink, Task};
use parking_lot::Mutex;

/// Multi-producer, single-consumer task queue
/// INVARIANT: tasks from one producer are dequeued in the order it pushed them
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task; safe from any thread
    pub fn push(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    /// Remove the oldest task
    pub fn pop(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Drop every pending task, returning how many were discarded.
    /// Tasks are dropped after the lock is released.
    pub fn clear(&self) -> usize {
        let discarded = std::mem::take(&mut *self.tasks.lock());
        discarded.len()
    }

    /// Run at most one task on the calling thread.
    /// A failing or panicking task is reported to `sink`; returns whether a task ran.
    pub fn try_run_one(&self, sink: &dyn ErrorSink) -> bool {
        let Some(task) = self.pop() else {
            return false;
        };
        let label = task.label();
        if let Err(err) = task.run_guarded() {
            tracing::warn!(task = label, error = %err, "task failed");
            sink.notify(&err);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::{CollectingSink, HostlinkError, Task};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            queue.push(Task::new(move || seen.lock().push(i)));
        }

        let sink = CollectingSink::new();
        while queue.try_run_one(&sink) {}

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_empty_queue_runs_nothing() {
        let queue = TaskQueue::new();
        assert!(!queue.try_run_one(&CollectingSink::new()));
    }

    #[test]
    fn test_failure_reported_and_next_task_runs() {
        let queue = TaskQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.push(Task::fallible(|| Err(HostlinkError::TaskFailure("boom".into()))));
        queue.push(Task::new(|| panic!("kaboom")).labeled("panicky"));
        let r = ran.clone();
        queue.push(Task::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        let sink = CollectingSink::new();
        while queue.try_run_one(&sink) {}

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let errors = sink.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], HostlinkError::TaskFailure("boom".into()));
        assert!(matches!(&errors[1], HostlinkError::TaskFailure(m) if m.contains("panicky") && m.contains("kaboom")));
    }

    #[test]
    fn test_clear_discards_pending() {
        let queue = TaskQueue::new();
        queue.push(Task::new(|| {}));
        queue.push(Task::new(|| {}));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}

//! Task definitions
//!
//! A task is the smallest unit of deferred work: a zero-argument action,
//! optionally closing over typed arguments captured when it was created.
//! Tasks run exactly once on the loop that dequeues them.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::{HostlinkError, HostlinkResult};

/// Outcome of running a task
pub type TaskResult = HostlinkResult<()>;

type Action = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// Deferred, pre-bound unit of work
pub struct Task {
    action: Action,
    label: &'static str,
}

impl Task {
    /// Wrap an infallible closure
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task::fallible(move || {
            f();
            Ok(())
        })
    }

    /// Wrap a closure that may report failure
    pub fn fallible<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        Task {
            action: Box::new(f),
            label: "task",
        }
    }

    /// Bind one argument now, invoke later
    pub fn bind<A, F>(f: F, arg: A) -> Self
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        Task::new(move || f(arg))
    }

    /// Bind two arguments now, invoke later
    pub fn bind2<A, B, F>(f: F, a: A, b: B) -> Self
    where
        A: Send + 'static,
        B: Send + 'static,
        F: FnOnce(A, B) + Send + 'static,
    {
        Task::new(move || f(a, b))
    }

    /// Attach a static label used in logs and failure reports
    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Run the task on the current thread
    pub fn run(self) -> TaskResult {
        (self.action)()
    }

    /// Run the task, turning a panic into `TaskFailure`
    pub fn run_guarded(self) -> TaskResult {
        let label = self.label;
        match panic::catch_unwind(AssertUnwindSafe(self.action)) {
            Ok(result) => result,
            Err(payload) => Err(HostlinkError::TaskFailure(format!(
                "{} panicked: {}",
                label,
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl<F> From<F> for Task
where
    F: FnOnce() + Send + 'static,
{
    fn from(f: F) -> Self {
        Task::new(f)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish()
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

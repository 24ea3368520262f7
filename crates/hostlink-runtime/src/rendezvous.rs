//! Blocking rendezvous - run work on a loop and wait for its result
//!
//! The caller parks on a oneshot channel until the loop has run the work.
//! Calls from the loop's own worker, or to a loop that is not running,
//! would never be answered and are rejected up front.
//!
//! These calls block the calling OS thread and must not be made from inside
//! an async runtime.

use std::panic::{self, AssertUnwindSafe};

use hostlink_core::{panic_message, HostlinkError, HostlinkResult, Task};
use tokio::sync::oneshot;

use crate::event_loop::EventLoop;
use crate::yielded::{self, Generator, PendingGenerator};

impl EventLoop {
    /// Run `task` on the loop and block until it has finished
    pub fn do_blocking(&self, task: impl Into<Task>) -> HostlinkResult<()> {
        let task = task.into();
        self.do_get_fallible(move || task.run())
    }

    /// Run `f` on the loop and block for its value
    pub fn do_get<T, F>(&self, f: F) -> HostlinkResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.do_get_fallible(move || Ok(f()))
    }

    /// Run a fallible `f` on the loop and block for its result.
    /// A panic inside `f` is reported to the loop's error sink and returned
    /// to the caller as `TaskFailure`.
    pub fn do_get_fallible<T, F>(&self, f: F) -> HostlinkResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> HostlinkResult<T> + Send + 'static,
    {
        self.check_rendezvous("do_get")?;
        let (tx, rx) = oneshot::channel::<HostlinkResult<T>>();
        let task = Task::fallible(move || {
            let (result, panicked) = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(result) => (result, None),
                Err(payload) => {
                    let err = HostlinkError::TaskFailure(format!(
                        "rendezvous panicked: {}",
                        panic_message(payload.as_ref())
                    ));
                    (Err(err.clone()), Some(err))
                }
            };
            let _ = tx.send(result);
            panicked.map_or(Ok(()), Err)
        })
        .labeled("rendezvous");
        self.enqueue(task);
        await_reply(rx)
    }

    /// Drive `generator` on the loop, one step per iteration
    pub fn do_yielded<G: Generator>(&self, generator: G) {
        let shared = self.shared().clone();
        self.enqueue(
            Task::new(move || {
                yielded::start_generator(
                    Box::new(PendingGenerator::new(generator, None)),
                    shared.sink.as_ref(),
                )
            })
            .labeled("yielded"),
        );
    }

    /// Drive `generator` on the loop and block until it completes
    pub fn do_yielded_get<G: Generator>(&self, generator: G) -> HostlinkResult<G::Output> {
        self.check_rendezvous("do_yielded_get")?;
        let (tx, rx) = oneshot::channel::<G::Output>();
        let shared = self.shared().clone();
        self.enqueue(
            Task::new(move || {
                yielded::start_generator(
                    Box::new(PendingGenerator::new(generator, Some(tx))),
                    shared.sink.as_ref(),
                )
            })
            .labeled("yielded"),
        );
        rx.blocking_recv().map_err(|_| discarded())
    }

    fn check_rendezvous(&self, call: &str) -> HostlinkResult<()> {
        if !self.is_running() {
            return Err(HostlinkError::invalid_state(format!(
                "{} on loop {} which is not running",
                call,
                self.name()
            )));
        }
        if self.is_loop_thread() {
            return Err(HostlinkError::invalid_state(format!(
                "{} called from loop {}'s own worker would deadlock",
                call,
                self.name()
            )));
        }
        Ok(())
    }
}

fn await_reply<T>(rx: oneshot::Receiver<HostlinkResult<T>>) -> HostlinkResult<T> {
    match rx.blocking_recv() {
        Ok(result) => result,
        Err(_) => Err(discarded()),
    }
}

fn discarded() -> HostlinkError {
    HostlinkError::invalid_state("loop discarded the request before completing it")
}

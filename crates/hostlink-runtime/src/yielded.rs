//! Yielded work - generators stepped once per loop iteration
//!
//! A generator is resumed on the loop thread until it completes. Between two
//! steps the loop drains other tasks, so long-running work can interleave
//! with everything else queued on the same loop.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use hostlink_core::{panic_message, ErrorSink, HostlinkError};
use tokio::sync::oneshot;

/// Result of one resume
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneratorState<T> {
    /// More steps remain
    Yielded,
    /// Finished with a value
    Complete(T),
}

/// Resumable computation driven by the loop
pub trait Generator: Send + 'static {
    type Output: Send + 'static;

    fn resume(&mut self) -> GeneratorState<Self::Output>;
}

impl<T, F> Generator for F
where
    T: Send + 'static,
    F: FnMut() -> GeneratorState<T> + Send + 'static,
{
    type Output = T;

    fn resume(&mut self) -> GeneratorState<T> {
        self()
    }
}

/// Type-erased pending generator
pub(crate) trait Stepper: Send {
    /// Resume once; true when finished
    fn step(&mut self) -> bool;
}

pub(crate) struct PendingGenerator<G: Generator> {
    generator: G,
    on_complete: Option<oneshot::Sender<G::Output>>,
}

impl<G: Generator> PendingGenerator<G> {
    pub(crate) fn new(generator: G, on_complete: Option<oneshot::Sender<G::Output>>) -> Self {
        PendingGenerator {
            generator,
            on_complete,
        }
    }
}

impl<G: Generator> Stepper for PendingGenerator<G> {
    fn step(&mut self) -> bool {
        match self.generator.resume() {
            GeneratorState::Yielded => false,
            GeneratorState::Complete(value) => {
                if let Some(tx) = self.on_complete.take() {
                    let _ = tx.send(value);
                }
                true
            }
        }
    }
}

thread_local! {
    // Generators owned by the loop running on this thread
    static PENDING: RefCell<Vec<Box<dyn Stepper>>> = RefCell::new(Vec::new());
}

/// Step a generator once and keep it for later iterations if unfinished
pub(crate) fn start_generator(mut stepper: Box<dyn Stepper>, sink: &dyn ErrorSink) {
    if let Some(false) = guarded_step(stepper.as_mut(), sink) {
        PENDING.with(|pending| pending.borrow_mut().push(stepper));
    }
}

/// Resume every pending generator on this thread once, in start order
pub(crate) fn step_pending(sink: &dyn ErrorSink) {
    let mut current = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
    if current.is_empty() {
        return;
    }
    current.retain_mut(|stepper| guarded_step(stepper.as_mut(), sink) == Some(false));
    PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        current.append(&mut pending);
        *pending = current;
    });
}

pub(crate) fn has_pending() -> bool {
    PENDING.with(|pending| !pending.borrow().is_empty())
}

/// Step, reporting a panic to `sink`. None means the generator panicked.
fn guarded_step(stepper: &mut dyn Stepper, sink: &dyn ErrorSink) -> Option<bool> {
    match panic::catch_unwind(AssertUnwindSafe(|| stepper.step())) {
        Ok(done) => Some(done),
        Err(payload) => {
            let err = HostlinkError::TaskFailure(format!(
                "generator panicked: {}",
                panic_message(payload.as_ref())
            ));
            tracing::warn!(error = %err, "dropping generator");
            sink.notify(&err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::CollectingSink;

    fn countdown(mut n: u32) -> impl Generator<Output = &'static str> {
        move || {
            if n == 0 {
                GeneratorState::Complete("done")
            } else {
                n -= 1;
                GeneratorState::Yielded
            }
        }
    }

    #[test]
    fn test_generator_stepped_once_per_iteration() {
        let sink = CollectingSink::new();
        let (tx, mut rx) = oneshot::channel();
        start_generator(Box::new(PendingGenerator::new(countdown(2), Some(tx))), &sink);
        assert!(has_pending());

        step_pending(&sink);
        assert!(rx.try_recv().is_err());
        step_pending(&sink);
        assert_eq!(rx.try_recv().unwrap(), "done");
        assert!(!has_pending());
    }

    #[test]
    fn test_immediately_complete_generator_not_kept() {
        let sink = CollectingSink::new();
        start_generator(Box::new(PendingGenerator::new(countdown(0), None)), &sink);
        assert!(!has_pending());
    }

    #[test]
    fn test_panicking_generator_dropped_and_reported() {
        let sink = CollectingSink::new();
        let mut steps = 0;
        let generator = move || -> GeneratorState<()> {
            steps += 1;
            if steps == 2 {
                panic!("second step");
            }
            GeneratorState::Yielded
        };
        start_generator(Box::new(PendingGenerator::new(generator, None)), &sink);
        step_pending(&sink);

        assert!(!has_pending());
        assert_eq!(sink.len(), 1);
    }
}

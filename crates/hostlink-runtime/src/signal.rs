//! Wake signal - a manual-reset event the worker sleeps on

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Manual-reset event
/// Stays raised until explicitly cleared; waiters return immediately while raised.
#[derive(Debug, Default)]
pub struct WakeSignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter
    pub fn set(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.cond.notify_all();
    }

    /// Clear without waiting
    pub fn reset(&self) {
        *self.raised.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.raised.lock()
    }

    /// Block until raised or `timeout` elapses, then clear.
    /// Returns whether the signal was raised.
    pub fn wait_and_clear(&self, timeout: Duration) -> bool {
        self.wait_until_and_clear(Instant::now() + timeout)
    }

    /// Block until raised or `deadline` passes, then clear
    pub fn wait_until_and_clear(&self, deadline: Instant) -> bool {
        let mut raised = self.raised.lock();
        while !*raised {
            if self.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        let was_raised = *raised;
        *raised = false;
        was_raised
    }
}

//! Error sinks
//!
//! A loop never lets a failing task unwind into its drain cycle. The failure
//! is handed to an `ErrorSink` instead, and the next task runs normally.

use parking_lot::Mutex;

use crate::HostlinkError;

/// Receiver for failures that cannot be returned to a caller
pub trait ErrorSink: Send + Sync {
    fn notify(&self, error: &HostlinkError);
}

/// Default sink: log through `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn notify(&self, error: &HostlinkError) {
        tracing::error!(error = %error, "task failed on loop");
    }
}

/// Sink that keeps every reported error, for inspection
#[derive(Debug, Default)]
pub struct CollectingSink {
    errors: Mutex<Vec<HostlinkError>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of errors reported so far
    pub fn errors(&self) -> Vec<HostlinkError> {
        self.errors.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}

impl ErrorSink for CollectingSink {
    fn notify(&self, error: &HostlinkError) {
        self.errors.lock().push(error.clone());
    }
}

//! Error types for hostlink

use std::time::Duration;

use thiserror::Error;

/// Core hostlink errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostlinkError {
    // Lifecycle errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Task errors
    #[error("Task failed: {0}")]
    TaskFailure(String),

    // Protocol errors
    #[error("Timed out waiting for {expected}: {elapsed:?} elapsed of {timeout:?}")]
    Timeout {
        expected: String,
        elapsed: Duration,
        timeout: Duration,
    },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Host PC reported {kind} while waiting for {awaiting}")]
    HostError { kind: String, awaiting: String },

    #[error("Latency unacceptable: max {max:?}, mean {mean:?}")]
    LatencyUnacceptable { max: Duration, mean: Duration },

    // Wire errors
    #[error("Codec error: {0}")]
    Codec(String),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HostlinkError {
    /// Build an `InvalidState` error from anything printable
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        HostlinkError::InvalidState(reason.into())
    }

    /// True for errors that end a host PC session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HostlinkError::ProtocolError(_)
                | HostlinkError::HostError { .. }
                | HostlinkError::ConnectionFailed(_)
                | HostlinkError::TransportError(_)
        )
    }
}

/// Result type for hostlink operations
pub type HostlinkResult<T> = Result<T, HostlinkError>;

//! Connection lifecycle

use std::fmt;

/// Lifecycle of a host PC connection
/// INVARIANT: `Failed` is absorbing
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Failed(String),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed(_))
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Handshaking) | (Connecting, Disconnected) => true,
            (Handshaking, Ready) | (Handshaking, Disconnected) => true,
            (Ready, Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Handshaking => write!(f, "handshaking"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

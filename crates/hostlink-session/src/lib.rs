//! hostlink Session - The host PC connection
//!
//! This crate drives one task-PC to host-PC session:
//! - Connection state machine and handshake
//! - Request/response waits that keep the loop working while they block
//! - Latency probe and periodic heartbeat
//! - Typed outbound task messages
//! - Randomized sync pulses for aligning recordings
//! - Reporting of every message sent and received

pub mod config;
pub mod connection;
pub mod handshake;
pub mod heartbeat;
pub mod inbound;
pub mod outbound;
pub mod reporter;
pub mod state;
pub mod syncbox;

pub use config::{HostPcConfig, SessionInfo};
pub use connection::Connection;
pub use inbound::{InboundEvent, InboundMessageQueue};
pub use outbound::{CclControl, ClosedLoopKind, TaskMessage};
pub use reporter::{CollectingReporter, MessageReporter, Reported, TracingReporter};
pub use state::ConnectionState;
pub use syncbox::{SyncPulseConfig, SyncPulser};

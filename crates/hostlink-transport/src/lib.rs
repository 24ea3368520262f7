//! hostlink Transport Layer - Line streams to the host PC
//!
//! This crate provides:
//! - The `HostStream` abstraction: synchronous line writes, asynchronous reads
//! - TCP streams driven by a private tokio runtime
//! - In-memory duplex streams for tests and simulators
//! - Connectors that open streams on demand

pub mod memory;
pub mod stream;
pub mod tcp;

pub use memory::*;
pub use stream::*;
pub use tcp::*;

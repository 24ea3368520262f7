//! hostlink Test Harness - Host PC simulation and session scenarios
//!
//! This crate provides:
//! - A scripted host PC over in-memory streams
//! - Fault injection: error replies, silence, EXIT, hang-up
//! - Simulated link latency with seeded jitter
//! - End-to-end scenarios driving a real `Connection`

pub mod integration;
pub mod simulator;

pub use integration::*;
pub use simulator::*;

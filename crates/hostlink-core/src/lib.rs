//! hostlink Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every hostlink layer:
//! - Tasks (deferred, pre-bound units of work)
//! - The error taxonomy and error sinks
//! - Identifiers (TimerId)
//! - Wire timestamps (WireTime)

pub mod error;
pub mod id;
pub mod sink;
pub mod task;
pub mod time;

pub use error::*;
pub use id::*;
pub use sink::*;
pub use task::*;
pub use time::*;

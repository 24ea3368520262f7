//! hostlink Time - Timer schedules and latency measurement
//!
//! This crate implements the timing arithmetic behind the loop's timers:
//! - Drift-free repeating schedules anchored at their arm instant
//! - Pause/resume that preserves the remaining time to the next firing
//! - Stopwatches and timeout budgets over the monotonic clock
//! - Round-trip latency statistics for the host PC link

pub mod clock;
pub mod latency;
pub mod schedule;

pub use clock::*;
pub use latency::*;
pub use schedule::*;

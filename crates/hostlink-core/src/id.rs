//! Identity types for hostlink
//!
//! Identifiers are plain 64-bit counters, unique within one loop.

use std::fmt;

/// Repeating event identity - handed out by a loop's timer registry
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimerId(pub u64);

impl TimerId {
    pub const ZERO: TimerId = TimerId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        TimerId(id)
    }

    /// Return this id and advance the counter
    #[inline]
    pub fn next(&mut self) -> TimerId {
        let id = *self;
        self.0 += 1;
        id
    }
}

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

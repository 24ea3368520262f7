//! Monotonic clock helpers

use std::time::{Duration, Instant};

/// Stopwatch over the monotonic OS clock
/// INVARIANT: elapsed time never decreases between restarts
#[derive(Clone, Copy, Debug)]
pub struct Stopwatch {
    /// Instant of the last (re)start
    started: Instant,
}

impl Stopwatch {
    /// Start a new stopwatch
    pub fn start() -> Self {
        Stopwatch {
            started: Instant::now(),
        }
    }

    /// Reset to zero and return the time measured so far
    pub fn restart(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.started);
        self.started = now;
        elapsed
    }

    /// Time since the last (re)start
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started_at(&self) -> Instant {
        self.started
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

/// A timeout budget measured from a fixed start
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Budget starting now
    pub fn after(budget: Duration) -> Self {
        Self::starting_at(Instant::now(), budget)
    }

    pub fn starting_at(start: Instant, budget: Duration) -> Self {
        Deadline { start, budget }
    }

    /// Absolute instant at which the budget runs out
    pub fn instant(&self) -> Instant {
        self.start + self.budget
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Remaining budget, zero once exhausted
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwatch_monotonic() {
        let mut sw = Stopwatch::start();

        let t1 = sw.elapsed();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = sw.elapsed();
        assert!(t2 > t1);

        let measured = sw.restart();
        assert!(measured >= Duration::from_millis(10));
        assert!(sw.elapsed() < measured);
    }

    #[test]
    fn test_deadline_budget() {
        let start = Instant::now();
        let deadline = Deadline::starting_at(start, Duration::from_millis(20));
        assert_eq!(deadline.instant(), start + Duration::from_millis(20));
        assert!(deadline.remaining() <= Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(25));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}

//! Timer schedules - when a repeating event fires, and how pausing shifts it
//!
//! A schedule is anchored at the instant it was (re)armed. Its firing
//! instants are `anchor + delay`, then every `interval` after that. Firing
//! instants are always derived from the anchor, never from the moment a
//! firing was actually observed, so late observation does not accumulate
//! drift.
//!
//! Suspending a schedule records the remaining time to the next firing as
//! the new delay; resuming re-anchors at the resume instant. A pause therefore
//! shifts the schedule by exactly the pause length and nothing else.

use std::time::{Duration, Instant};

/// Smallest interval accepted for a repeating schedule
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Iteration bound of a repeating event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Iterations {
    /// Fire until cancelled
    Unbounded,
    /// Fire exactly this many times
    Times(u32),
}

impl Iterations {
    /// Map the integer convention used by host configurations
    /// (negative = unbounded) onto an iteration bound
    pub fn from_count(count: i64) -> Self {
        if count < 0 {
            Iterations::Unbounded
        } else {
            Iterations::Times(count.min(u32::MAX as i64) as u32)
        }
    }

    pub fn limit(&self) -> Option<u32> {
        match self {
            Iterations::Unbounded => None,
            Iterations::Times(n) => Some(*n),
        }
    }

    /// True once `count` firings satisfy the bound
    pub fn is_exhausted(&self, count: u32) -> bool {
        match self {
            Iterations::Unbounded => false,
            Iterations::Times(n) => count >= *n,
        }
    }
}

/// Remaining time until the next firing of a schedule armed `elapsed` ago.
///
/// ```text
/// |----||----------||----------|
/// delay   interval    interval
///        elapsed   |
/// remaining = interval - (elapsed - delay) % interval
/// ```
///
/// Before the first firing this is simply `delay - elapsed`. Past the first
/// firing of a one-shot schedule the remainder is zero.
pub fn remaining_after(elapsed: Duration, delay: Duration, interval: Option<Duration>) -> Duration {
    if elapsed < delay {
        return delay - elapsed;
    }
    match interval {
        None => Duration::ZERO,
        Some(interval) => {
            let interval_ns = interval.max(MIN_INTERVAL).as_nanos();
            let into_cycle = (elapsed - delay).as_nanos() % interval_ns;
            Duration::from_nanos((interval_ns - into_cycle) as u64)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Counting down towards `next_due`
    Armed { next_due: Instant },
    /// Paused; `delay` holds the remaining time
    Suspended,
    /// One-shot schedule that already fired
    Finished,
}

/// Firing schedule of one repeating event
#[derive(Clone, Copy, Debug)]
pub struct TimerSchedule {
    /// Delay before the first firing after `anchor`
    delay: Duration,
    /// Period between firings (None = one-shot)
    interval: Option<Duration>,
    /// Instant the current delay started counting
    anchor: Instant,
    phase: Phase,
}

impl TimerSchedule {
    /// Create a schedule armed at `now`
    pub fn armed(delay: Duration, interval: Option<Duration>, now: Instant) -> Self {
        TimerSchedule {
            delay,
            interval: interval.map(|i| i.max(MIN_INTERVAL)),
            anchor: now,
            phase: Phase::Armed {
                next_due: now + delay,
            },
        }
    }

    /// Create a schedule that starts suspended
    pub fn suspended(delay: Duration, interval: Option<Duration>, now: Instant) -> Self {
        let mut schedule = Self::armed(delay, interval, now);
        schedule.phase = Phase::Suspended;
        schedule
    }

    /// Next firing instant, if armed
    pub fn next_due(&self) -> Option<Instant> {
        match self.phase {
            Phase::Armed { next_due } => Some(next_due),
            _ => None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due().is_some_and(|due| due <= now)
    }

    pub fn is_suspended(&self) -> bool {
        self.phase == Phase::Suspended
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Currently recorded delay (the remaining time while suspended)
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// First firing instant strictly after `t`, following the anchor phase
    fn boundary_after(&self, t: Instant) -> Option<Instant> {
        let first = self.anchor + self.delay;
        if t < first {
            return Some(first);
        }
        let interval = self.interval?;
        let cycles = (t - first).as_nanos() / interval.as_nanos() + 1;
        let offset = interval.as_nanos().saturating_mul(cycles);
        Some(first + Duration::from_nanos(offset.min(u64::MAX as u128) as u64))
    }

    /// Record a firing observed at `now` and move to the next slot.
    /// Slots missed while the observer was late are skipped; the phase is kept.
    /// Returns the next due instant (None for a finished one-shot).
    pub fn advance(&mut self, now: Instant) -> Option<Instant> {
        let Phase::Armed { next_due } = self.phase else {
            return None;
        };
        match self.boundary_after(now.max(next_due)) {
            Some(next) => {
                self.phase = Phase::Armed { next_due: next };
                Some(next)
            }
            None => {
                self.phase = Phase::Finished;
                None
            }
        }
    }

    /// Pause at `now`; returns the remaining time that resume will honour
    pub fn suspend(&mut self, now: Instant) -> Duration {
        let Phase::Armed { next_due } = self.phase else {
            return self.delay;
        };
        let remaining = if next_due <= now {
            // Due but not yet observed: fire immediately on resume
            Duration::ZERO
        } else {
            remaining_after(now - self.anchor, self.delay, self.interval)
        };
        self.delay = remaining;
        self.phase = Phase::Suspended;
        remaining
    }

    /// Resume at `now` with the delay recorded at suspension
    pub fn resume(&mut self, now: Instant) {
        if self.phase != Phase::Suspended {
            return;
        }
        self.anchor = now;
        self.phase = Phase::Armed {
            next_due: now + self.delay,
        };
    }

    /// Stop scheduling permanently
    pub fn finish(&mut self) {
        self.phase = Phase::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_iterations_from_count() {
        assert_eq!(Iterations::from_count(-1), Iterations::Unbounded);
        assert_eq!(Iterations::from_count(0), Iterations::Times(0));
        assert_eq!(Iterations::from_count(3), Iterations::Times(3));
        assert!(Iterations::Times(3).is_exhausted(3));
        assert!(!Iterations::Times(3).is_exhausted(2));
        assert!(!Iterations::Unbounded.is_exhausted(u32::MAX));
    }

    #[test]
    fn test_remaining_before_first_firing() {
        assert_eq!(remaining_after(ms(4), ms(10), Some(ms(10))), ms(6));
        assert_eq!(remaining_after(ms(0), ms(0), Some(ms(10))), ms(10));
    }

    #[test]
    fn test_remaining_spanning_several_intervals() {
        // delay 5, interval 10: firings at 5, 15, 25, 35 ...
        assert_eq!(remaining_after(ms(29), ms(5), Some(ms(10))), ms(6));
        assert_eq!(remaining_after(ms(125), ms(5), Some(ms(10))), ms(10));
    }

    #[test]
    fn test_one_shot_past_due_is_zero() {
        assert_eq!(remaining_after(ms(50), ms(20), None), Duration::ZERO);
    }

    #[test]
    fn test_advance_keeps_phase() {
        let t0 = Instant::now();
        let mut schedule = TimerSchedule::armed(ms(0), Some(ms(10)), t0);
        assert_eq!(schedule.next_due(), Some(t0));

        // Observed 3ms late: next slot still at t0 + 10
        assert_eq!(schedule.advance(t0 + ms(3)), Some(t0 + ms(10)));
        // Observed at 35ms: slots 20 and 30 are skipped, 40 is next
        assert_eq!(schedule.advance(t0 + ms(35)), Some(t0 + ms(40)));
    }

    #[test]
    fn test_one_shot_finishes() {
        let t0 = Instant::now();
        let mut schedule = TimerSchedule::armed(ms(5), None, t0);
        assert!(!schedule.is_due(t0));
        assert!(schedule.is_due(t0 + ms(5)));
        assert_eq!(schedule.advance(t0 + ms(5)), None);
        assert!(schedule.is_finished());
        assert_eq!(schedule.next_due(), None);
    }

    #[test]
    fn test_pause_preserves_remaining_time() {
        let t0 = Instant::now();
        let mut schedule = TimerSchedule::armed(ms(10), Some(ms(10)), t0);

        // Pause 4ms into the first interval
        assert_eq!(schedule.suspend(t0 + ms(4)), ms(6));
        assert!(schedule.is_suspended());
        assert_eq!(schedule.next_due(), None);

        // Resume much later: next firing 6ms after resume, not 10, not 0
        let resumed = t0 + ms(5_000);
        schedule.resume(resumed);
        assert_eq!(schedule.next_due(), Some(resumed + ms(6)));

        // Subsequent firings keep the original interval
        assert_eq!(schedule.advance(resumed + ms(6)), Some(resumed + ms(16)));
    }

    #[test]
    fn test_pause_after_several_firings() {
        let t0 = Instant::now();
        let mut schedule = TimerSchedule::armed(ms(0), Some(ms(10)), t0);
        schedule.advance(t0);
        schedule.advance(t0 + ms(10));
        schedule.advance(t0 + ms(20));

        // 3ms into the fourth interval
        assert_eq!(schedule.suspend(t0 + ms(23)), ms(7));
    }

    #[test]
    fn test_overdue_firing_survives_pause() {
        let t0 = Instant::now();
        let mut schedule = TimerSchedule::armed(ms(10), Some(ms(10)), t0);
        assert_eq!(schedule.suspend(t0 + ms(12)), Duration::ZERO);
    }

    #[test]
    fn test_repeated_pause_resume_cycles() {
        let t0 = Instant::now();
        let mut schedule = TimerSchedule::armed(ms(10), Some(ms(10)), t0);
        assert_eq!(schedule.suspend(t0 + ms(3)), ms(7));
        schedule.resume(t0 + ms(100));
        assert_eq!(schedule.suspend(t0 + ms(102)), ms(5));
        schedule.resume(t0 + ms(200));
        assert_eq!(schedule.next_due(), Some(t0 + ms(205)));
    }

    #[test]
    fn test_suspended_constructor() {
        let t0 = Instant::now();
        let mut schedule = TimerSchedule::suspended(ms(8), Some(ms(10)), t0);
        assert!(schedule.is_suspended());
        schedule.resume(t0 + ms(1));
        assert_eq!(schedule.next_due(), Some(t0 + ms(9)));
    }

    proptest! {
        #[test]
        fn prop_remaining_lands_on_a_firing_slot(
            elapsed in 0u64..100_000,
            delay in 0u64..5_000,
            interval in 1u64..5_000,
        ) {
            let remaining = remaining_after(ms(elapsed), ms(delay), Some(ms(interval)));
            prop_assert!(remaining > Duration::ZERO);
            prop_assert!(remaining <= ms(delay.max(interval)));

            let fires_at = elapsed + remaining.as_millis() as u64;
            prop_assert!(fires_at >= delay);
            prop_assert_eq!((fires_at - delay) % interval, 0);
        }

        #[test]
        fn prop_pause_shifts_by_pause_length(
            pause_at in 0u64..1_000,
            pause_len in 0u64..10_000,
            delay in 0u64..200,
            interval in 1u64..200,
        ) {
            let t0 = Instant::now();
            let mut paused = TimerSchedule::armed(ms(delay), Some(ms(interval)), t0);
            let mut reference = paused;

            let now = t0 + ms(pause_at);
            if paused.is_due(now) {
                // overdue slots are covered by test_overdue_firing_survives_pause
                paused.advance(now);
                reference.advance(now);
            }
            paused.suspend(now);
            paused.resume(now + ms(pause_len));

            let expected = reference.next_due().map(|due| due + ms(pause_len));
            prop_assert_eq!(paused.next_due(), expected);
        }
    }
}

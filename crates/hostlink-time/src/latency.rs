//! Round-trip latency statistics for the host PC link

use std::time::Duration;

/// Acceptance limits for a latency probe
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencyLimits {
    /// Largest single round trip tolerated
    pub max: Duration,
    /// Largest mean round trip tolerated
    pub mean: Duration,
}

impl Default for LatencyLimits {
    fn default() -> Self {
        LatencyLimits {
            max: Duration::from_millis(20),
            mean: Duration::from_millis(20),
        }
    }
}

/// Summary of a latency probe
#[derive(Clone, Debug, PartialEq)]
pub struct LatencyReport {
    /// Raw round-trip samples, in probe order
    pub samples: Vec<Duration>,
    /// Largest round trip
    pub max: Duration,
    /// Mean round trip
    pub mean: Duration,
    /// Resolution of the measuring clock
    pub accuracy: Duration,
}

impl LatencyReport {
    /// Whether the probe stays within `limits`
    pub fn is_acceptable(&self, limits: &LatencyLimits) -> bool {
        self.max <= limits.max && self.mean <= limits.mean
    }
}

impl LatencyLimits {
    /// A single round trip the probe should stop at
    pub fn rejects_round_trip(&self, rtt: Duration) -> bool {
        rtt > self.max
    }
}

/// Accumulates round-trip samples
#[derive(Clone, Debug, Default)]
pub struct LatencyStats {
    samples: Vec<Duration>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        LatencyStats {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, rtt: Duration) {
        self.samples.push(rtt);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max(&self) -> Duration {
        self.samples.iter().copied().max().unwrap_or_default()
    }

    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    /// Finish the probe
    pub fn report(self) -> LatencyReport {
        LatencyReport {
            max: self.max(),
            mean: self.mean(),
            accuracy: clock_accuracy(),
            samples: self.samples,
        }
    }
}

/// Resolution of `Instant` as reported to the host PC.
/// Every supported platform exposes at least microsecond resolution.
pub fn clock_accuracy() -> Duration {
    Duration::from_micros(1)
}

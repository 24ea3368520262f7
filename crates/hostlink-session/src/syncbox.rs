//! Networked sync pulses
//!
//! While running, a pulser sends `NSBSYNCPULSE` to the host PC at random
//! intervals and reports a `syncPulse` event for each one, so the task and
//! host recordings can be aligned afterwards. Every pulse schedules the next
//! one with `do_in` on the connection's loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostlink_core::{HostlinkError, HostlinkResult, Task, TaskResult, TimerId};
use hostlink_wire::{types, HostMessage};
use parking_lot::Mutex;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use crate::connection::Connection;

/// Timing of the pulse train
#[derive(Clone, Debug, PartialEq)]
pub struct SyncPulseConfig {
    /// Delay before the first pulse
    pub start_delay: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Fixed RNG seed; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for SyncPulseConfig {
    fn default() -> Self {
        SyncPulseConfig {
            start_delay: Duration::from_millis(1000),
            min_interval: Duration::from_millis(800),
            max_interval: Duration::from_millis(1200),
            seed: None,
        }
    }
}

impl SyncPulseConfig {
    pub fn validate(&self) -> HostlinkResult<()> {
        if self.min_interval > self.max_interval {
            return Err(HostlinkError::Config(format!(
                "sync pulse min_interval {:?} exceeds max_interval {:?}",
                self.min_interval, self.max_interval
            )));
        }
        if self.max_interval.is_zero() {
            return Err(HostlinkError::Config(
                "sync pulse interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

struct PulserInner {
    conn: Connection,
    config: SyncPulseConfig,
    intervals: Uniform<u64>,
    rng: Mutex<StdRng>,
    running: AtomicBool,
    /// Bumped on every start/stop; pulses of an older train do nothing
    generation: AtomicU64,
    pending: Mutex<Option<TimerId>>,
    pulses: AtomicU64,
}

/// Sync pulse train over a host PC connection
#[derive(Clone)]
pub struct SyncPulser {
    inner: Arc<PulserInner>,
}

impl SyncPulser {
    pub fn new(conn: Connection, config: SyncPulseConfig) -> HostlinkResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let intervals = Uniform::new_inclusive(
            config.min_interval.as_micros() as u64,
            config.max_interval.as_micros() as u64,
        );
        Ok(SyncPulser {
            inner: Arc::new(PulserInner {
                conn,
                config,
                intervals,
                rng: Mutex::new(rng),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                pending: Mutex::new(None),
                pulses: AtomicU64::new(0),
            }),
        })
    }

    /// Begin pulsing after the start delay. No-op if already running.
    pub fn start(&self) -> HostlinkResult<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if !self.inner.conn.is_enabled() {
            return Ok(());
        }
        if let Err(err) = self.schedule(generation, self.inner.config.start_delay) {
            self.inner.running.store(false, Ordering::Release);
            return Err(err);
        }
        tracing::info!(start_delay = ?self.inner.config.start_delay, "sync pulses started");
        Ok(())
    }

    /// Stop pulsing; a pulse already handed to the loop is dropped
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(id) = self.inner.pending.lock().take() {
            self.inner.conn.event_loop().cancel_repeating(id);
        }
        tracing::info!(pulses = self.pulse_count(), "sync pulses stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Pulses sent since construction
    pub fn pulse_count(&self) -> u64 {
        self.inner.pulses.load(Ordering::Relaxed)
    }

    /// Delay before the pulse after this one
    pub fn next_interval(&self) -> Duration {
        let micros = self.inner.intervals.sample(&mut *self.inner.rng.lock());
        Duration::from_micros(micros)
    }

    fn schedule(&self, generation: u64, delay: Duration) -> HostlinkResult<()> {
        let weak = Arc::downgrade(&self.inner);
        let task = Task::fallible(move || match weak.upgrade() {
            Some(inner) => SyncPulser { inner }.pulse(generation),
            None => Ok(()),
        })
        .labeled("sync-pulse");
        let id = self.inner.conn.event_loop().do_in(delay, task)?;
        *self.inner.pending.lock() = Some(id);
        Ok(())
    }

    fn pulse(&self, generation: u64) -> TaskResult {
        if !self.is_running() || self.inner.generation.load(Ordering::Acquire) != generation {
            return Ok(());
        }
        let conn = &self.inner.conn;
        if !conn.is_ready() {
            tracing::warn!(state = %conn.state(), "host PC not ready; sync pulses stopped");
            self.inner.running.store(false, Ordering::Release);
            return Ok(());
        }

        conn.inner.reporter.report_event("syncPulse", &json!({}));
        if let Err(err) = conn.write_on_loop(&HostMessage::new(types::SYNC_PULSE)) {
            self.inner.running.store(false, Ordering::Release);
            return Err(err);
        }
        let count = self.inner.pulses.fetch_add(1, Ordering::Relaxed) + 1;
        let next = self.next_interval();
        tracing::trace!(count, ?next, "sync pulse");
        self.schedule(generation, next)
    }
}

impl std::fmt::Debug for SyncPulser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPulser")
            .field("running", &self.is_running())
            .field("pulses", &self.pulse_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostPcConfig;
    use crate::reporter::CollectingReporter;
    use hostlink_core::CollectingSink;
    use hostlink_transport::{HostStream, MemoryConnector, MemoryHostStream, StreamEvent};
    use hostlink_wire::LineCodec;
    use std::thread;
    use std::time::Instant;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    struct Host {
        conn: Connection,
        reporter: Arc<CollectingReporter>,
        seen: Arc<Mutex<Vec<String>>>,
        _ends: Arc<Mutex<Vec<Arc<MemoryHostStream>>>>,
    }

    impl Host {
        fn pulses_seen(&self) -> usize {
            self.seen.lock().iter().filter(|t| *t == types::SYNC_PULSE).count()
        }

        fn wait_for_pulses(&self, n: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.pulses_seen() < n {
                assert!(Instant::now() < deadline, "only {} pulses arrived", self.pulses_seen());
                thread::sleep(ms(5));
            }
        }
    }

    /// Connection that has finished the handshake with a cooperative host
    fn ready_host() -> Host {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ends = Arc::new(Mutex::new(Vec::new()));
        let (log, keep) = (seen.clone(), ends.clone());
        let connector = MemoryConnector::new(move || {
            let (task, host) = MemoryHostStream::pair("task", "host");
            let host = Arc::new(host);
            let weak = Arc::downgrade(&host);
            let log = log.clone();
            host.start_reading(Box::new(move |event| {
                let StreamEvent::Line(line) = event else { return };
                let Ok(message) = LineCodec::decode(&line) else { return };
                log.lock().push(message.msg_type.clone());
                let reply = match message.msg_type.as_str() {
                    types::CONNECTED => HostMessage::new(types::CONNECTED_OK),
                    types::CONFIGURE => HostMessage::new(types::CONFIGURE_OK),
                    types::HEARTBEAT => HostMessage::new(types::HEARTBEAT_OK),
                    types::READY => HostMessage::new(types::START),
                    _ => return,
                };
                if let (Some(host), Ok(line)) = (weak.upgrade(), LineCodec::encode(&reply)) {
                    let _ = host.write_line(&line);
                }
            }))?;
            keep.lock().push(host);
            Ok(task)
        });
        let config = HostPcConfig {
            latency_probe_count: 2,
            latency_probe_spacing_ms: 1,
            max_latency_ms: 1000,
            mean_latency_ms: 1000,
            ..HostPcConfig::default()
        };
        let reporter = Arc::new(CollectingReporter::new());
        let conn = Connection::with_parts(
            config,
            Arc::new(connector),
            reporter.clone(),
            Arc::new(CollectingSink::new()),
        );
        conn.connect().unwrap();
        Host {
            conn,
            reporter,
            seen,
            _ends: ends,
        }
    }

    fn fast(seed: u64) -> SyncPulseConfig {
        SyncPulseConfig {
            start_delay: ms(20),
            min_interval: ms(10),
            max_interval: ms(30),
            seed: Some(seed),
        }
    }

    #[test]
    fn test_default_timing() {
        let config = SyncPulseConfig::default();
        assert_eq!(config.start_delay, ms(1000));
        assert_eq!(config.min_interval, ms(800));
        assert_eq!(config.max_interval, ms(1200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_interval_rejected() {
        let config = SyncPulseConfig {
            min_interval: ms(50),
            max_interval: ms(10),
            ..SyncPulseConfig::default()
        };
        assert!(matches!(
            SyncPulser::new(Connection::disabled(), config),
            Err(HostlinkError::Config(_))
        ));
    }

    #[test]
    fn test_intervals_are_seeded_and_bounded() {
        let draw = |seed| {
            let pulser = SyncPulser::new(Connection::disabled(), fast(seed)).unwrap();
            (0..50).map(|_| pulser.next_interval()).collect::<Vec<_>>()
        };
        let first = draw(11);
        assert_eq!(first, draw(11));
        assert!(first.iter().all(|d| *d >= ms(10) && *d <= ms(30)));
        assert!(first.iter().any(|d| *d != first[0]));
    }

    #[test]
    fn test_pulses_reach_host_until_stopped() {
        let host = ready_host();
        let pulser = SyncPulser::new(host.conn.clone(), fast(3)).unwrap();
        pulser.start().unwrap();
        assert!(pulser.is_running());

        host.wait_for_pulses(4);
        pulser.stop();
        assert!(!pulser.is_running());
        let sent = host.pulses_seen();
        assert!(host.reporter.events("syncPulse").len() >= 4);

        thread::sleep(ms(100));
        // At most one pulse was already on the wire when stop ran
        assert!(host.pulses_seen() <= sent + 1);
        assert!(host.conn.is_ready());
        host.conn.shutdown().unwrap();
    }

    #[test]
    fn test_first_pulse_waits_for_start_delay() {
        let host = ready_host();
        let config = SyncPulseConfig {
            start_delay: ms(200),
            ..fast(5)
        };
        let pulser = SyncPulser::new(host.conn.clone(), config).unwrap();
        pulser.start().unwrap();
        thread::sleep(ms(100));
        assert_eq!(host.pulses_seen(), 0);
        host.wait_for_pulses(1);
        pulser.stop();
        host.conn.shutdown().unwrap();
    }

    #[test]
    fn test_start_twice_keeps_one_train() {
        let host = ready_host();
        let config = SyncPulseConfig {
            start_delay: Duration::ZERO,
            min_interval: ms(40),
            max_interval: ms(40),
            seed: Some(1),
        };
        let pulser = SyncPulser::new(host.conn.clone(), config).unwrap();
        pulser.start().unwrap();
        pulser.start().unwrap();
        thread::sleep(ms(200));
        pulser.stop();
        // One train gives about 5 pulses in 200 ms; two would give about 10
        let pulses = pulser.pulse_count();
        assert!((1..=8).contains(&pulses), "{} pulses", pulses);
        host.conn.shutdown().unwrap();
    }

    #[test]
    fn test_restart_after_stop() {
        let host = ready_host();
        let pulser = SyncPulser::new(host.conn.clone(), fast(9)).unwrap();
        pulser.start().unwrap();
        host.wait_for_pulses(1);
        pulser.stop();
        let before = host.pulses_seen();
        pulser.start().unwrap();
        host.wait_for_pulses(before + 2);
        pulser.stop();
        host.conn.shutdown().unwrap();
    }

    #[test]
    fn test_start_needs_running_loop() {
        let conn = Connection::new(HostPcConfig::default(), Arc::new(MemoryConnector::refusing()));
        let pulser = SyncPulser::new(conn, fast(1)).unwrap();
        assert!(matches!(pulser.start(), Err(HostlinkError::InvalidState(_))));
        assert!(!pulser.is_running());
    }

    #[test]
    fn test_disabled_connection_is_inert() {
        let pulser = SyncPulser::new(Connection::disabled(), fast(1)).unwrap();
        pulser.start().unwrap();
        assert!(pulser.is_running());
        pulser.stop();
        assert_eq!(pulser.pulse_count(), 0);
    }
}

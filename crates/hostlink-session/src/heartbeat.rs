//! Heartbeat and latency probe
//!
//! Both are `HEARTBEAT` / `HEARTBEAT_OK` round trips. The probe runs a fixed
//! number of them during the handshake and judges the link by their round
//! trip times. The periodic heartbeat then keeps running on a repeating
//! timer until the connection ends; a missed reply fails the connection.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostlink_core::{HostlinkError, HostlinkResult, TaskResult};
use hostlink_runtime::PumpOutcome;
use hostlink_time::{Iterations, LatencyStats, Stopwatch};
use hostlink_wire::{types, HostMessage};
use serde_json::json;

use crate::connection::Connection;

impl Connection {
    /// One heartbeat round trip on the loop thread; returns its round-trip
    /// time, or `None` if an enclosing wait expired first
    pub(crate) fn heartbeat_once(&self, timeout: Duration) -> HostlinkResult<Option<Duration>> {
        let count = self.inner.heartbeat_count.fetch_add(1, Ordering::Relaxed) + 1;
        let message = HostMessage::new(types::HEARTBEAT).with_field("count", count);
        let watch = Stopwatch::start();
        let reply = self.exchange_within(Some(message), vec![types::HEARTBEAT_OK.to_string()], timeout)?;
        Ok(reply.map(|_| watch.elapsed()))
    }

    /// Measure round trips and reject a link that is too slow
    pub(crate) fn run_latency_probe(&self) -> HostlinkResult<()> {
        let config = &self.inner.config;
        let rounds = config.latency_probe_count as usize;
        let spacing = config.latency_probe_spacing();
        let limits = config.latency_limits();
        let mut stats = LatencyStats::with_capacity(rounds);

        for round in 0..rounds {
            let rtt = self.heartbeat_once(config.message_timeout())?.ok_or_else(|| {
                HostlinkError::invalid_state("latency probe interrupted by an enclosing wait")
            })?;
            stats.record(rtt);
            if limits.rejects_round_trip(rtt) {
                tracing::warn!(?rtt, round, "host PC round trip over the limit; probe stopped");
                let mean = stats.mean();
                *self.inner.latency.lock() = Some(stats.report());
                return Err(HostlinkError::LatencyUnacceptable { max: rtt, mean });
            }
            if round + 1 < rounds && rtt < spacing {
                self.idle_for(spacing - rtt)?;
            }
        }

        let report = stats.report();
        tracing::info!(
            max = ?report.max,
            mean = ?report.mean,
            samples = report.samples.len(),
            "host PC latency"
        );
        self.inner.reporter.report_event(
            "latency check",
            &json!({
                "max_latency": millis(report.max),
                "mean_latency": millis(report.mean),
                "accuracy": report.accuracy.as_nanos() as u64,
            }),
        );
        let acceptable = report.is_acceptable(&limits);
        let (max, mean) = (report.max, report.mean);
        *self.inner.latency.lock() = Some(report);

        if !acceptable {
            return Err(HostlinkError::LatencyUnacceptable { max, mean });
        }
        Ok(())
    }

    /// Keep the loop working for `duration` without waiting on anything
    fn idle_for(&self, duration: Duration) -> HostlinkResult<()> {
        let deadline = Instant::now() + duration;
        match self.inner.event_loop.pump_until(deadline, || None::<()>)? {
            PumpOutcome::Stopped => Err(self
                .failure()
                .unwrap_or_else(|| HostlinkError::invalid_state("loop stopped during latency probe"))),
            _ => Ok(()),
        }
    }

    /// Register the periodic heartbeat on the loop's timers
    pub(crate) fn start_heartbeat(&self) -> HostlinkResult<()> {
        let weak = Arc::downgrade(&self.inner);
        let id = self.inner.event_loop.do_repeating(
            Iterations::Unbounded,
            Duration::ZERO,
            self.inner.config.heartbeat_interval(),
            move || match weak.upgrade() {
                Some(inner) => Connection { inner }.heartbeat_tick(),
                None => Ok(()),
            },
        )?;
        if let Some(previous) = self.inner.heartbeat.lock().replace(id) {
            self.inner.event_loop.cancel_repeating(previous);
        }
        tracing::debug!(interval = ?self.inner.config.heartbeat_interval(), "heartbeat started");
        Ok(())
    }

    fn heartbeat_tick(&self) -> TaskResult {
        if self.inner.heartbeat_busy.swap(true, Ordering::AcqRel) {
            tracing::trace!("heartbeat still waiting for a reply; tick skipped");
            return Ok(());
        }
        let result = self.heartbeat_once(self.inner.config.heartbeat_timeout());
        self.inner.heartbeat_busy.store(false, Ordering::Release);
        match result {
            Ok(Some(rtt)) => {
                tracing::trace!(?rtt, "heartbeat");
                Ok(())
            }
            Ok(None) => {
                tracing::debug!("heartbeat abandoned; retried on the next tick");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Stop the periodic heartbeat, if running
    pub(crate) fn cancel_heartbeat(&self) {
        if let Some(id) = self.inner.heartbeat.lock().take() {
            self.inner.event_loop.cancel_repeating(id);
            tracing::debug!("heartbeat stopped");
        }
    }

    /// Heartbeats sent so far, probe included
    pub fn heartbeat_count(&self) -> u64 {
        self.inner.heartbeat_count.load(Ordering::Relaxed)
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

//! End-to-end session scenarios
//!
//! Runs a real `Connection` against the scripted host PC and checks how the
//! session ends up:
//! - Handshake completion
//! - Failure handling when the host reports an error at any stage
//! - Heartbeat supervision after the handshake
//! - Latency rejection

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hostlink_core::{CollectingSink, HostlinkError};
use hostlink_session::{CollectingReporter, Connection, ConnectionState, HostPcConfig};

use crate::simulator::{Fault, HostProfile, HostSimulator};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Scenario configuration
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    /// Task-side connection settings
    pub connection: HostPcConfig,
    /// Host-side behaviour
    pub host: HostProfile,
    /// How long to watch the session after the handshake
    pub observe: Duration,
}

impl ScenarioConfig {
    /// Fast handshake: short probe, frequent heartbeats
    pub fn minimal() -> Self {
        ScenarioConfig {
            connection: HostPcConfig {
                message_timeout_ms: 2000,
                heartbeat_interval_ms: 20,
                heartbeat_timeout_ms: 500,
                latency_probe_count: 3,
                latency_probe_spacing_ms: 1,
                max_latency_ms: 1000,
                mean_latency_ms: 1000,
                ..HostPcConfig::default()
            },
            host: HostProfile::local(),
            observe: Duration::from_millis(100),
        }
    }

    /// Default probe and limits over a jittery but acceptable link
    pub fn standard() -> Self {
        ScenarioConfig {
            connection: HostPcConfig {
                heartbeat_interval_ms: 100,
                latency_probe_spacing_ms: 5,
                ..HostPcConfig::default()
            },
            host: HostProfile::jittery(0, 2, 42),
            observe: Duration::from_millis(300),
        }
    }

    pub fn with_host(mut self, host: HostProfile) -> Self {
        self.host = host;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.host.fault = Some(fault);
        self
    }

    pub fn observing(mut self, observe: Duration) -> Self {
        self.observe = observe;
        self
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// How a scenario ended
#[derive(Clone, Debug)]
pub struct ScenarioResult {
    /// Result of `connect()`
    pub connect: Result<(), HostlinkError>,
    /// State once the observation window closed
    pub final_state: ConnectionState,
    /// First fatal error, from `connect()` or from the loop afterwards
    pub failure: Option<HostlinkError>,
    /// Heartbeat timer still registered at the end
    pub heartbeat_active: bool,
    pub loop_running: bool,
    /// Message types the host received
    pub host_received: Vec<String>,
    /// Errors reported to the connection's sink
    pub sink_errors: Vec<HostlinkError>,
    pub duration: Duration,
}

impl ScenarioResult {
    pub fn reached_ready(&self) -> bool {
        self.connect.is_ok()
    }

    /// Failed with the heartbeat cancelled and the loop stopped
    pub fn failed_cleanly(&self) -> bool {
        self.final_state.is_failed() && !self.heartbeat_active && !self.loop_running
    }
}

/// Runs one connection against one simulated host
pub struct ScenarioHarness {
    config: ScenarioConfig,
    host: HostSimulator,
    connection: Connection,
    reporter: Arc<CollectingReporter>,
    sink: Arc<CollectingSink>,
}

impl ScenarioHarness {
    pub fn new(config: ScenarioConfig) -> Self {
        let host = HostSimulator::new(config.host.clone());
        let reporter = Arc::new(CollectingReporter::new());
        let sink = Arc::new(CollectingSink::new());
        let connection = Connection::with_parts(
            config.connection.clone(),
            Arc::new(host.connector()),
            reporter.clone(),
            sink.clone(),
        );
        ScenarioHarness {
            config,
            host,
            connection,
            reporter,
            sink,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn host(&self) -> &HostSimulator {
        &self.host
    }

    pub fn reporter(&self) -> &CollectingReporter {
        &self.reporter
    }

    /// Connect, then watch the session until it fails or the window closes
    pub fn run(&mut self) -> ScenarioResult {
        let started = Instant::now();
        let connect = self.connection.connect();
        if connect.is_ok() {
            let until = Instant::now() + self.config.observe;
            while Instant::now() < until && !self.connection.state().is_failed() {
                thread::sleep(Duration::from_millis(5));
            }
        }
        // A failure is recorded before it reaches the sink
        if self.connection.state().is_failed() && connect.is_ok() {
            let until = Instant::now() + Duration::from_secs(2);
            while self.sink.is_empty() && Instant::now() < until {
                thread::sleep(Duration::from_millis(1));
            }
        }
        self.result(connect, started.elapsed())
    }

    fn result(&self, connect: Result<(), HostlinkError>, duration: Duration) -> ScenarioResult {
        let failure = match &connect {
            Err(err) => Some(err.clone()),
            Ok(()) => self.sink.errors().into_iter().next(),
        };
        ScenarioResult {
            final_state: self.connection.state(),
            failure,
            heartbeat_active: self
                .connection
                .heartbeat_timer()
                .map_or(false, |id| self.connection.event_loop().has_timer(id)),
            loop_running: self.connection.event_loop().is_running(),
            host_received: self.host.received_types(),
            sink_errors: self.sink.errors(),
            duration,
            connect,
        }
    }

    /// Shut the connection down; harmless after a failure
    pub fn finish(&self) {
        if let Err(err) = self.connection.shutdown() {
            tracing::debug!(error = %err, "scenario shutdown");
        }
    }
}

impl Drop for ScenarioHarness {
    fn drop(&mut self) {
        self.finish();
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Cooperative host: the session reaches `Ready` and stays there
pub fn scenario_handshake() -> ScenarioResult {
    ScenarioHarness::new(ScenarioConfig::minimal()).run()
}

/// The host answers `trigger` with an error message
pub fn scenario_error_on(trigger: &str, occurrence: u32) -> ScenarioResult {
    let config = ScenarioConfig::minimal()
        .with_fault(Fault::error_on(trigger, "ERROR").nth(occurrence))
        .observing(Duration::from_millis(500));
    ScenarioHarness::new(config).run()
}

/// Every reply takes longer than the latency limits allow
pub fn scenario_slow_link() -> ScenarioResult {
    let mut config = ScenarioConfig::minimal().with_host(HostProfile::slow(Duration::from_millis(25)));
    config.connection.max_latency_ms = 20;
    config.connection.mean_latency_ms = 20;
    ScenarioHarness::new(config).run()
}

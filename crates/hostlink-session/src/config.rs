//! Host PC connection configuration

use std::path::Path;
use std::time::Duration;

use hostlink_core::{HostlinkError, HostlinkResult};
use hostlink_time::LatencyLimits;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Session metadata sent in `CONFIGURE`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionInfo {
    pub stim_mode: String,
    pub experiment: String,
    pub subject: String,
    pub session: u32,
}

impl Default for SessionInfo {
    fn default() -> Self {
        SessionInfo {
            stim_mode: "none".to_string(),
            experiment: String::new(),
            subject: String::new(),
            session: 0,
        }
    }
}

impl SessionInfo {
    /// Payload of the `CONFIGURE` message. The session number travels as a
    /// string, as host PCs expect.
    pub fn to_configure_data(&self) -> Value {
        json!({
            "stim_mode": self.stim_mode,
            "experiment": self.experiment,
            "subject": self.subject,
            "session": self.session.to_string(),
        })
    }
}

/// Host PC connection configuration. Durations are integer milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPcConfig {
    /// When false every connection operation succeeds without I/O
    pub enabled: bool,
    pub server_ip: String,
    pub server_port: u16,
    pub connect_timeout_ms: u64,
    /// Reply timeout for handshake messages and the latency probe
    pub message_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Reply timeout for periodic heartbeats
    pub heartbeat_timeout_ms: u64,
    pub latency_probe_count: u32,
    /// Spacing between probe round trips
    pub latency_probe_spacing_ms: u64,
    pub max_latency_ms: u64,
    pub mean_latency_ms: u64,
    pub session: SessionInfo,
}

impl Default for HostPcConfig {
    fn default() -> Self {
        let limits = LatencyLimits::default();
        HostPcConfig {
            enabled: true,
            server_ip: "127.0.0.1".to_string(),
            server_port: 8889,
            connect_timeout_ms: 3000,
            message_timeout_ms: 3000,
            heartbeat_interval_ms: 1000,
            heartbeat_timeout_ms: 8000,
            latency_probe_count: 20,
            latency_probe_spacing_ms: 50,
            max_latency_ms: limits.max.as_millis() as u64,
            mean_latency_ms: limits.mean.as_millis() as u64,
            session: SessionInfo::default(),
        }
    }
}

impl HostPcConfig {
    /// Configuration with the interface switched off
    pub fn disabled() -> Self {
        HostPcConfig {
            enabled: false,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> HostlinkResult<Self> {
        let config: HostPcConfig = serde_json::from_str(json)
            .map_err(|e| HostlinkError::Config(format!("invalid host PC config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> HostlinkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HostlinkError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Reject values the connection cannot work with
    pub fn validate(&self) -> HostlinkResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.server_ip.trim().is_empty() {
            return Err(HostlinkError::Config("server_ip is empty".into()));
        }
        if self.server_port == 0 {
            return Err(HostlinkError::Config("server_port must be non-zero".into()));
        }
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("message_timeout_ms", self.message_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
        ] {
            if value == 0 {
                return Err(HostlinkError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.latency_probe_count == 0 {
            return Err(HostlinkError::Config(
                "latency_probe_count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// "ip:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn latency_probe_spacing(&self) -> Duration {
        Duration::from_millis(self.latency_probe_spacing_ms)
    }

    pub fn latency_limits(&self) -> LatencyLimits {
        LatencyLimits {
            max: Duration::from_millis(self.max_latency_ms),
            mean: Duration::from_millis(self.mean_latency_ms),
        }
    }
}

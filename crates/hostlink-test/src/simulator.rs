//! Scripted host PC for protocol testing
//!
//! Plays the host side of a session over in-memory streams:
//! - Answers the handshake and echoes heartbeats
//! - Delays replies by a simulated link latency with seeded jitter
//! - Injects faults when a chosen message arrives
//! - Pushes unsolicited messages on demand

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hostlink_core::{HostlinkError, HostlinkResult};
use hostlink_transport::{HostStream, MemoryConnector, MemoryHostStream, StreamEvent};
use hostlink_wire::{types, HostMessage, LineCodec};
use parking_lot::Mutex;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};

/// What the host does instead of its normal reply
#[derive(Clone, Debug, PartialEq)]
pub enum FaultAction {
    /// Reply with a message of this type, e.g. "ERROR" or "STIM_ERROR"
    Error(String),
    /// Do not reply at all
    Silence,
    /// Reply normally, then send `EXIT`
    Exit,
    /// Close the stream
    HangUp,
}

/// A fault fired by the `occurrence`-th message of type `trigger`
#[derive(Clone, Debug, PartialEq)]
pub struct Fault {
    pub trigger: String,
    /// 1-based
    pub occurrence: u32,
    pub action: FaultAction,
}

impl Fault {
    pub fn new(trigger: impl Into<String>, action: FaultAction) -> Self {
        Fault {
            trigger: trigger.into(),
            occurrence: 1,
            action,
        }
    }

    /// Answer `trigger` with an error message of type `kind`
    pub fn error_on(trigger: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(trigger, FaultAction::Error(kind.into()))
    }

    /// Fire on the `n`-th matching message instead of the first
    pub fn nth(mut self, n: u32) -> Self {
        self.occurrence = n.max(1);
        self
    }
}

/// Behaviour of the simulated host PC
#[derive(Clone, Debug)]
pub struct HostProfile {
    /// Delay before every reply
    pub latency: Duration,
    /// Extra uniform delay in milliseconds, inclusive
    pub jitter_ms: Option<(u64, u64)>,
    /// RNG seed for jitter
    pub seed: u64,
    /// Data of the `CONFIGURE_OK` reply
    pub configure_reply: Value,
    /// Request type to reply type, for messages outside the handshake
    pub replies: HashMap<String, String>,
    pub fault: Option<Fault>,
}

impl Default for HostProfile {
    fn default() -> Self {
        HostProfile {
            latency: Duration::ZERO,
            jitter_ms: None,
            seed: 0,
            configure_reply: json!({"stim_channels": []}),
            replies: HashMap::new(),
            fault: None,
        }
    }
}

impl HostProfile {
    /// Host on a quiet local link
    pub fn local() -> Self {
        Self::default()
    }

    /// Host whose replies take `latency`
    pub fn slow(latency: Duration) -> Self {
        HostProfile {
            latency,
            ..Self::default()
        }
    }

    /// Host with a small random delay on every reply
    pub fn jittery(min_ms: u64, max_ms: u64, seed: u64) -> Self {
        HostProfile {
            jitter_ms: Some((min_ms, max_ms)),
            seed,
            ..Self::default()
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_reply(mut self, request: impl Into<String>, reply: impl Into<String>) -> Self {
        self.replies.insert(request.into(), reply.into());
        self
    }
}

struct SimShared {
    profile: HostProfile,
    rng: Mutex<StdRng>,
    received: Mutex<Vec<HostMessage>>,
    counts: Mutex<HashMap<String, u32>>,
    stream: Mutex<Option<Arc<MemoryHostStream>>>,
    connections: AtomicU32,
}

/// Simulated host PC; clones share the same host
#[derive(Clone)]
pub struct HostSimulator {
    shared: Arc<SimShared>,
}

impl HostSimulator {
    pub fn new(profile: HostProfile) -> Self {
        let rng = StdRng::seed_from_u64(profile.seed);
        HostSimulator {
            shared: Arc::new(SimShared {
                profile,
                rng: Mutex::new(rng),
                received: Mutex::new(Vec::new()),
                counts: Mutex::new(HashMap::new()),
                stream: Mutex::new(None),
                connections: AtomicU32::new(0),
            }),
        }
    }

    /// Connector whose every connection lands on this host
    pub fn connector(&self) -> MemoryConnector {
        let shared = Arc::downgrade(&self.shared);
        MemoryConnector::new(move || {
            let shared = shared
                .upgrade()
                .ok_or_else(|| HostlinkError::ConnectionFailed("host simulator is gone".into()))?;
            SimShared::accept(&shared)
        })
    }

    /// Every message the host received, in order
    pub fn received(&self) -> Vec<HostMessage> {
        self.shared.received.lock().clone()
    }

    pub fn received_types(&self) -> Vec<String> {
        self.shared
            .received
            .lock()
            .iter()
            .map(|m| m.msg_type.clone())
            .collect()
    }

    /// How many messages of `msg_type` arrived
    pub fn received_count(&self, msg_type: &str) -> u32 {
        self.shared
            .counts
            .lock()
            .get(msg_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn connections(&self) -> u32 {
        self.shared.connections.load(Ordering::Relaxed)
    }

    /// Send an unsolicited message to the task PC
    pub fn inject(&self, message: HostMessage) -> HostlinkResult<()> {
        let stream = self.current_stream()?;
        stream.write_line(&LineCodec::encode(&message)?)
    }

    /// Send a raw line, terminator added
    pub fn inject_raw(&self, line: &str) -> HostlinkResult<()> {
        self.current_stream()?.write_line(line)
    }

    /// Close the current connection from the host side
    pub fn hang_up(&self) {
        if let Some(stream) = self.shared.stream.lock().take() {
            stream.shutdown();
        }
    }

    fn current_stream(&self) -> HostlinkResult<Arc<MemoryHostStream>> {
        self.shared
            .stream
            .lock()
            .clone()
            .ok_or_else(|| HostlinkError::invalid_state("no task PC connected"))
    }
}

impl SimShared {
    fn accept(shared: &Arc<SimShared>) -> HostlinkResult<MemoryHostStream> {
        let n = shared.connections.fetch_add(1, Ordering::Relaxed) + 1;
        let (task, host) = MemoryHostStream::pair(&format!("task{}", n), &format!("host{}", n));
        let host = Arc::new(host);
        let weak_host = Arc::downgrade(&host);
        let weak_shared = Arc::downgrade(shared);
        host.start_reading(Box::new(move |event| {
            let StreamEvent::Line(line) = event else {
                return;
            };
            if let (Some(shared), Some(host)) = (weak_shared.upgrade(), weak_host.upgrade()) {
                shared.on_line(host.as_ref(), &line);
            }
        }))?;
        *shared.stream.lock() = Some(host);
        tracing::debug!(connection = n, "host simulator accepted a connection");
        Ok(task)
    }

    fn on_line(&self, host: &MemoryHostStream, line: &str) {
        let message = match LineCodec::decode(line) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "host simulator got an undecodable line");
                return;
            }
        };
        let occurrence = {
            let mut counts = self.counts.lock();
            let count = counts.entry(message.msg_type.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.received.lock().push(message.clone());

        let fault = self
            .profile
            .fault
            .as_ref()
            .filter(|f| f.trigger == message.msg_type && f.occurrence == occurrence);
        let replies = match fault.map(|f| &f.action) {
            None => self.normal_reply(&message).into_iter().collect(),
            Some(FaultAction::Error(kind)) => {
                vec![HostMessage::new(kind.as_str()).with_field("injected", message.msg_type.as_str())]
            }
            Some(FaultAction::Silence) => Vec::new(),
            Some(FaultAction::Exit) => {
                let mut replies: Vec<HostMessage> = self.normal_reply(&message).into_iter().collect();
                replies.push(HostMessage::new(types::EXIT));
                replies
            }
            Some(FaultAction::HangUp) => {
                tracing::debug!(trigger = %message.msg_type, "host simulator hanging up");
                host.shutdown();
                return;
            }
        };

        for reply in replies {
            let delay = self.reply_delay();
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let written = LineCodec::encode(&reply).and_then(|line| host.write_line(&line));
            if let Err(err) = written {
                tracing::debug!(error = %err, "host simulator reply dropped");
                return;
            }
        }
    }

    fn normal_reply(&self, message: &HostMessage) -> Option<HostMessage> {
        let reply = match message.msg_type.as_str() {
            types::CONNECTED => HostMessage::new(types::CONNECTED_OK),
            types::CONFIGURE => {
                HostMessage::new(types::CONFIGURE_OK).with_data(self.profile.configure_reply.clone())
            }
            types::HEARTBEAT => HostMessage::new(types::HEARTBEAT_OK).with_data(message.data.clone()),
            types::READY => HostMessage::new(types::START),
            other => HostMessage::new(self.profile.replies.get(other)?.as_str()),
        };
        Some(reply)
    }

    fn reply_delay(&self) -> Duration {
        let jitter = match self.profile.jitter_ms {
            Some((min, max)) if max > min => {
                Uniform::new_inclusive(min, max).sample(&mut *self.rng.lock())
            }
            Some((min, _)) => min,
            None => 0,
        };
        self.profile.latency + Duration::from_millis(jitter)
    }
}

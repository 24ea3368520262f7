//! Host PC connection
//!
//! A `Connection` owns one event loop. Every protocol step runs on that loop,
//! so connection state is only ever touched by one thread at a time. Public
//! operations may be called from any thread; they are forwarded to the loop
//! and block until it has answered.
//!
//! Waiting for a reply keeps the loop working: while a wait is open the loop
//! drains inbound messages itself and keeps running other queued tasks
//! (heartbeats included). Waits nest; a message claimed by an outer wait is
//! parked until that wait picks it up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use hostlink_core::{ErrorSink, HostlinkError, HostlinkResult, Task, TaskResult, TimerId, TracingSink, WireTime};
use hostlink_runtime::{EventLoop, LoopConfig, PumpOutcome};
use hostlink_time::LatencyReport;
use hostlink_transport::{Connector, HostStream, MemoryConnector, StreamEvent, TcpConnector};
use hostlink_wire::{Direction, HostMessage, InboundMessage, LineCodec};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::HostPcConfig;
use crate::inbound::{InboundEvent, InboundMessageQueue};
use crate::reporter::{MessageReporter, TracingReporter};
use crate::state::ConnectionState;

pub(crate) struct ConnectionInner {
    pub(crate) config: HostPcConfig,
    pub(crate) event_loop: EventLoop,
    connector: Arc<dyn Connector>,
    pub(crate) reporter: Arc<dyn MessageReporter>,
    inbound: InboundMessageQueue,
    state: Mutex<ConnectionState>,
    /// First fatal error, kept for waits interrupted by the failure
    failure: Mutex<Option<HostlinkError>>,
    stream: Mutex<Option<Arc<dyn HostStream>>>,
    /// Bumped on every attach/detach; stale reader events are ignored
    stream_generation: AtomicU64,
    /// Every open wait, innermost last
    waits: Mutex<Vec<OpenWait>>,
    /// Messages claimed by an outer wait
    parked: Mutex<VecDeque<InboundMessage>>,
    pub(crate) heartbeat: Mutex<Option<TimerId>>,
    pub(crate) heartbeat_busy: AtomicBool,
    pub(crate) heartbeat_count: AtomicU64,
    pub(crate) host_config: Mutex<Option<Value>>,
    pub(crate) latency: Mutex<Option<LatencyReport>>,
}

/// A reply wait in progress on the loop thread
struct OpenWait {
    expected: Vec<String>,
    deadline: Instant,
}

/// Connection to the host PC; clones share the same connection
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connection that logs messages and failures through `tracing`
    pub fn new(config: HostPcConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_parts(config, connector, Arc::new(TracingReporter), Arc::new(TracingSink))
    }

    pub fn with_parts(
        config: HostPcConfig,
        connector: Arc<dyn Connector>,
        reporter: Arc<dyn MessageReporter>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let event_loop = EventLoop::with_sink(LoopConfig::named("hostpc"), sink);
        Connection {
            inner: Arc::new(ConnectionInner {
                config,
                event_loop,
                connector,
                reporter,
                inbound: InboundMessageQueue::new(),
                state: Mutex::new(ConnectionState::Disconnected),
                failure: Mutex::new(None),
                stream: Mutex::new(None),
                stream_generation: AtomicU64::new(0),
                waits: Mutex::new(Vec::new()),
                parked: Mutex::new(VecDeque::new()),
                heartbeat: Mutex::new(None),
                heartbeat_busy: AtomicBool::new(false),
                heartbeat_count: AtomicU64::new(0),
                host_config: Mutex::new(None),
                latency: Mutex::new(None),
            }),
        }
    }

    /// TCP connection to the configured address
    pub fn tcp(config: HostPcConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(config.address()));
        Self::new(config, connector)
    }

    /// Connection whose every operation is a successful no-op
    pub fn disabled() -> Self {
        Self::new(HostPcConfig::disabled(), Arc::new(MemoryConnector::refusing()))
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    pub fn config(&self) -> &HostPcConfig {
        &self.inner.config
    }

    /// The loop all protocol work runs on
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().is_ready()
    }

    /// Data of the host's `CONFIGURE_OK` reply
    pub fn host_config(&self) -> Option<Value> {
        self.inner.host_config.lock().clone()
    }

    /// Result of the handshake latency probe
    pub fn latency_report(&self) -> Option<LatencyReport> {
        self.inner.latency.lock().clone()
    }

    pub fn heartbeat_timer(&self) -> Option<TimerId> {
        *self.inner.heartbeat.lock()
    }

    /// Open the stream and run the handshake; returns once the host PC sent `START`
    pub fn connect(&self) -> HostlinkResult<()> {
        if !self.is_enabled() {
            tracing::info!("host PC interface disabled; not connecting");
            return Ok(());
        }
        self.inner.config.validate()?;
        if !self.inner.event_loop.is_loop_thread() {
            self.inner.event_loop.start()?;
        }
        self.on_loop(|conn| conn.connect_on_loop())
    }

    /// Send a message and wait for a reply of type `expected`
    pub fn send_and_wait(
        &self,
        msg_type: &str,
        data: Value,
        expected: &str,
        timeout: Duration,
    ) -> HostlinkResult<InboundMessage> {
        if !self.is_enabled() {
            return Ok(synthetic_reply(expected));
        }
        let message = HostMessage::new(msg_type).with_data(data);
        let expected = vec![expected.to_string()];
        self.on_loop(move |conn| conn.exchange(Some(message), expected, timeout))
    }

    /// Wait for a message of type `expected` without sending anything
    pub fn wait_for_message(&self, expected: &str, timeout: Duration) -> HostlinkResult<InboundMessage> {
        self.wait_for_any(&[expected], timeout)
    }

    /// Wait for the first message whose type is one of `expected`
    pub fn wait_for_any(&self, expected: &[&str], timeout: Duration) -> HostlinkResult<InboundMessage> {
        if !self.is_enabled() {
            return Ok(synthetic_reply(expected.first().copied().unwrap_or_default()));
        }
        let expected: Vec<String> = expected.iter().map(|t| t.to_string()).collect();
        self.on_loop(move |conn| conn.exchange(None, expected, timeout))
    }

    /// Queue a message for sending; returns without waiting for the write
    pub fn send_message(&self, msg_type: &str, data: Value) -> HostlinkResult<()> {
        self.send_host_message(HostMessage::new(msg_type).with_data(data))
    }

    pub(crate) fn send_host_message(&self, message: HostMessage) -> HostlinkResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if !self.inner.event_loop.is_running() {
            return Err(HostlinkError::invalid_state(format!(
                "cannot send {}: connection is {}",
                message.msg_type,
                self.state()
            )));
        }
        let this = self.clone();
        self.inner.event_loop.enqueue(
            Task::fallible(move || this.write_on_loop(&message)).labeled("hostpc-send"),
        );
        Ok(())
    }

    /// Cancel the heartbeat and close the stream
    pub fn disconnect(&self) -> HostlinkResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if self.inner.event_loop.is_running() {
            match self.on_loop(|conn| {
                conn.disconnect_on_loop();
                Ok(())
            }) {
                Err(HostlinkError::InvalidState(_)) if !self.inner.event_loop.is_running() => {}
                other => return other,
            }
        }
        self.disconnect_on_loop();
        Ok(())
    }

    /// Disconnect and stop the connection's loop
    pub fn shutdown(&self) -> HostlinkResult<()> {
        self.disconnect()?;
        self.inner.event_loop.stop();
        if !self.inner.event_loop.is_loop_thread() {
            self.inner.event_loop.join()?;
        }
        Ok(())
    }

    /// Run `f` on the connection's loop, blocking for the result
    fn on_loop<T, F>(&self, f: F) -> HostlinkResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> HostlinkResult<T> + Send + 'static,
    {
        if self.inner.event_loop.is_loop_thread() {
            return f(self);
        }
        if !self.inner.event_loop.is_running() {
            return Err(self.failure().unwrap_or_else(|| {
                HostlinkError::invalid_state(format!("connection is {}", self.state()))
            }));
        }
        let this = self.clone();
        self.inner.event_loop.do_get_fallible(move || f(&this))
    }

    fn connect_on_loop(&self) -> HostlinkResult<()> {
        self.transition(ConnectionState::Connecting)?;
        tracing::info!(host = %self.inner.connector.describe(), "connecting to host PC");

        let stream = match self.inner.connector.connect(self.inner.config.connect_timeout()) {
            Ok(stream) => stream,
            Err(err) => {
                let err = match err {
                    HostlinkError::ConnectionFailed(_) => err,
                    other => HostlinkError::ConnectionFailed(other.to_string()),
                };
                return Err(self.fail(err));
            }
        };
        if let Err(err) = self.attach(stream) {
            return Err(self.fail(err));
        }

        self.transition(ConnectionState::Handshaking)?;
        if let Err(err) = self.handshake() {
            return Err(self.fail(err));
        }
        self.transition(ConnectionState::Ready)?;
        tracing::info!("host PC ready");
        Ok(())
    }

    fn transition(&self, next: ConnectionState) -> HostlinkResult<()> {
        let mut state = self.inner.state.lock();
        if !state.can_transition_to(&next) {
            return Err(HostlinkError::invalid_state(format!(
                "connection cannot go from {} to {}",
                *state, next
            )));
        }
        tracing::debug!(from = %*state, to = %next, "connection state");
        *state = next;
        Ok(())
    }

    fn attach(&self, stream: Arc<dyn HostStream>) -> HostlinkResult<()> {
        let generation = self.inner.stream_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let weak: Weak<ConnectionInner> = Arc::downgrade(&self.inner);
        stream.start_reading(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                Connection { inner }.on_stream_event(generation, event);
            }
        }))?;
        *self.inner.stream.lock() = Some(stream);
        Ok(())
    }

    fn close_stream(&self) {
        self.inner.stream_generation.fetch_add(1, Ordering::AcqRel);
        let stream = self.inner.stream.lock().take();
        if let Some(stream) = stream {
            stream.shutdown();
        }
    }

    /// Reader side: decode, queue, and wake the loop
    fn on_stream_event(&self, generation: u64, event: StreamEvent) {
        if self.inner.stream_generation.load(Ordering::Acquire) != generation {
            return;
        }
        let item = match event {
            StreamEvent::Line(line) => match LineCodec::decode_inbound(&line, WireTime::now()) {
                Ok(message) => InboundEvent::Message(message),
                Err(error) => InboundEvent::Malformed { raw: line, error },
            },
            StreamEvent::Error(error @ HostlinkError::Codec(_)) => InboundEvent::Malformed {
                raw: String::new(),
                error,
            },
            StreamEvent::Error(error) => {
                tracing::warn!(error = %error, "host PC stream error");
                return;
            }
            StreamEvent::Closed => InboundEvent::Closed,
        };
        self.inner.inbound.push(item);
        self.schedule_dispatch();
    }

    fn schedule_dispatch(&self) {
        let this = self.clone();
        self.inner
            .event_loop
            .enqueue(Task::fallible(move || this.dispatch()).labeled("hostpc-dispatch"));
    }

    /// Handle inbound messages nobody is waiting for
    fn dispatch(&self) -> TaskResult {
        if !self.inner.waits.lock().is_empty() {
            return Ok(());
        }
        let parked: Vec<InboundMessage> = self.inner.parked.lock().drain(..).collect();
        for message in parked {
            self.handle_unsolicited(message, "nothing")?;
        }
        while let Some(event) = self.inner.inbound.pop() {
            match event {
                InboundEvent::Message(message) => {
                    self.report_received(&message);
                    self.handle_unsolicited(message, "nothing")?;
                }
                InboundEvent::Malformed { raw, error } => {
                    return Err(self.fail(malformed(&raw, &error)));
                }
                InboundEvent::Closed => {
                    if let Some(err) = self.closed_by_peer() {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_unsolicited(&self, message: InboundMessage, awaiting: &str) -> TaskResult {
        if message.message.is_fatal() {
            return Err(self.fail(host_error(&message, awaiting)));
        }
        tracing::debug!(msg_type = message.msg_type(), awaiting, "unsolicited host PC message");
        Ok(())
    }

    /// Fail unless the stream was already closed on our side
    fn closed_by_peer(&self) -> Option<HostlinkError> {
        let state = self.inner.state.lock().clone();
        match state {
            ConnectionState::Disconnected | ConnectionState::Failed(_) => None,
            _ => Some(self.fail(HostlinkError::ConnectionFailed(
                "host PC closed the connection".into(),
            ))),
        }
    }

    fn report_received(&self, message: &InboundMessage) {
        self.inner.reporter.report(
            &message.message,
            &message.raw,
            Direction::Received,
            message.received_at,
        );
    }

    /// Write one message on the loop thread
    pub(crate) fn write_on_loop(&self, message: &HostMessage) -> HostlinkResult<()> {
        let stream = self.inner.stream.lock().clone().ok_or_else(|| {
            HostlinkError::invalid_state(format!(
                "cannot send {}: not connected to the host PC",
                message.msg_type
            ))
        })?;
        let line = LineCodec::encode(message)?;
        if let Err(err) = stream.write_line(&line) {
            return Err(self.fail(err));
        }
        tracing::debug!(msg_type = %message.msg_type, "sent to host PC");
        self.inner
            .reporter
            .report(message, &line, Direction::Sent, WireTime::now());
        Ok(())
    }

    /// Optionally send `outgoing`, then wait on the loop for one of `expected`.
    /// Loop thread only.
    pub(crate) fn exchange(
        &self,
        outgoing: Option<HostMessage>,
        expected: Vec<String>,
        timeout: Duration,
    ) -> HostlinkResult<InboundMessage> {
        let started = Instant::now();
        let label = expected.join("|");
        match self.exchange_within(outgoing, expected, timeout)? {
            Some(message) => Ok(message),
            None => Err(HostlinkError::Timeout {
                expected: label,
                elapsed: started.elapsed(),
                timeout,
            }),
        }
    }

    /// Like `exchange`, but a nested wait never outlives the waits enclosing
    /// it. Returns `Ok(None)` when an enclosing wait's deadline cut this one
    /// short.
    pub(crate) fn exchange_within(
        &self,
        outgoing: Option<HostMessage>,
        expected: Vec<String>,
        timeout: Duration,
    ) -> HostlinkResult<Option<InboundMessage>> {
        let started = Instant::now();
        let label = expected.join("|");
        let deadline = started + timeout;
        let cap = {
            let mut waits = self.inner.waits.lock();
            let cap = waits.iter().map(|w| w.deadline).min();
            waits.push(OpenWait {
                expected: expected.clone(),
                deadline,
            });
            cap
        };
        let effective = cap.map_or(deadline, |cap| cap.min(deadline));

        let outcome = match outgoing {
            Some(message) => self.write_on_loop(&message).and_then(|()| {
                self.inner
                    .event_loop
                    .pump_until(effective, || self.poll_inbound(&expected, &label))
            }),
            None => self
                .inner
                .event_loop
                .pump_until(effective, || self.poll_inbound(&expected, &label)),
        };

        let open_waits = {
            let mut waits = self.inner.waits.lock();
            waits.pop();
            waits.len()
        };
        if open_waits == 0
            && (!self.inner.inbound.is_empty() || !self.inner.parked.lock().is_empty())
        {
            self.schedule_dispatch();
        }

        match outcome? {
            PumpOutcome::Ready(result) => result.map(Some),
            PumpOutcome::TimedOut if effective < deadline => {
                tracing::debug!(
                    expected = %label,
                    elapsed = ?started.elapsed(),
                    "enclosing wait expired; abandoning nested wait"
                );
                Ok(None)
            }
            PumpOutcome::TimedOut => {
                let elapsed = started.elapsed();
                tracing::warn!(expected = %label, ?elapsed, "timed out waiting for host PC");
                Err(HostlinkError::Timeout {
                    expected: label,
                    elapsed,
                    timeout,
                })
            }
            PumpOutcome::Stopped => Err(self.failure().unwrap_or_else(|| {
                HostlinkError::invalid_state(format!("loop stopped while waiting for {}", label))
            })),
        }
    }

    /// One drain of the inbound queue on behalf of the innermost wait
    fn poll_inbound(&self, expected: &[String], label: &str) -> Option<HostlinkResult<InboundMessage>> {
        {
            let mut parked = self.inner.parked.lock();
            if let Some(pos) = parked
                .iter()
                .position(|m| expected.iter().any(|t| t == m.msg_type()))
            {
                return parked.remove(pos).map(Ok);
            }
        }

        while let Some(event) = self.inner.inbound.pop() {
            match event {
                InboundEvent::Message(message) => {
                    self.report_received(&message);
                    if expected.iter().any(|t| t == message.msg_type()) {
                        return Some(Ok(message));
                    }
                    if message.message.is_fatal() {
                        return Some(Err(self.fail(host_error(&message, label))));
                    }
                    if self.claimed_by_outer_wait(message.msg_type()) {
                        self.inner.parked.lock().push_back(message);
                        continue;
                    }
                    tracing::debug!(
                        msg_type = message.msg_type(),
                        awaiting = label,
                        "unsolicited host PC message"
                    );
                }
                InboundEvent::Malformed { raw, error } => {
                    return Some(Err(self.fail(malformed(&raw, &error))));
                }
                InboundEvent::Closed => {
                    if let Some(err) = self.closed_by_peer() {
                        return Some(Err(err));
                    }
                }
            }
        }
        None
    }

    fn claimed_by_outer_wait(&self, msg_type: &str) -> bool {
        let waits = self.inner.waits.lock();
        let outer = waits.len().saturating_sub(1);
        waits[..outer]
            .iter()
            .any(|wait| wait.expected.iter().any(|t| t == msg_type))
    }

    /// Enter `Failed`: cancel the heartbeat, close the stream, stop the loop.
    /// Only the first failure is recorded; `err` is returned either way.
    pub(crate) fn fail(&self, err: HostlinkError) -> HostlinkError {
        {
            let mut state = self.inner.state.lock();
            if state.is_failed() {
                return err;
            }
            *state = ConnectionState::Failed(err.to_string());
        }
        *self.inner.failure.lock() = Some(err.clone());
        tracing::error!(error = %err, "host PC connection failed");

        self.cancel_heartbeat();
        self.close_stream();
        self.inner
            .reporter
            .report_event("host pc failure", &json!({ "error": err.to_string() }));
        self.inner.event_loop.stop();
        err
    }

    pub(crate) fn failure(&self) -> Option<HostlinkError> {
        self.inner.failure.lock().clone()
    }

    fn disconnect_on_loop(&self) {
        self.cancel_heartbeat();
        self.close_stream();
        self.inner.inbound.clear();
        self.inner.parked.lock().clear();
        let mut state = self.inner.state.lock();
        if !state.is_failed() && *state != ConnectionState::Disconnected {
            *state = ConnectionState::Disconnected;
            tracing::info!("disconnected from host PC");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}

fn host_error(message: &InboundMessage, awaiting: &str) -> HostlinkError {
    HostlinkError::HostError {
        kind: message.msg_type().to_string(),
        awaiting: awaiting.to_string(),
    }
}

fn malformed(raw: &str, error: &HostlinkError) -> HostlinkError {
    HostlinkError::ProtocolError(format!("undecodable message from host PC ({}): {:?}", error, raw))
}

/// Reply handed out by a disabled connection
fn synthetic_reply(msg_type: &str) -> InboundMessage {
    let message = HostMessage::new(msg_type);
    InboundMessage {
        received_at: message.time,
        message,
        raw: String::new(),
    }
}

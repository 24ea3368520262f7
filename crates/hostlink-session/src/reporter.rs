//! Message reporting - every message sent or received, plus named events

use hostlink_core::WireTime;
use hostlink_wire::{Direction, HostMessage};
use parking_lot::Mutex;
use serde_json::Value;

/// Receiver for the session's message log
pub trait MessageReporter: Send + Sync {
    /// A message crossed the wire; `at` is the task-PC clock
    fn report(&self, message: &HostMessage, raw: &str, direction: Direction, at: WireTime);

    /// A named session event such as "latency check"
    fn report_event(&self, name: &str, data: &Value);
}

/// Default reporter: log through `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl MessageReporter for TracingReporter {
    fn report(&self, message: &HostMessage, raw: &str, direction: Direction, at: WireTime) {
        tracing::debug!(
            direction = direction.as_str(),
            msg_type = %message.msg_type,
            task_pc_time = at.as_secs_f64(),
            raw,
            "host PC message"
        );
    }

    fn report_event(&self, name: &str, data: &Value) {
        tracing::info!(event = name, data = %data, "host PC event");
    }
}

/// One entry recorded by `CollectingReporter`
#[derive(Clone, Debug, PartialEq)]
pub enum Reported {
    Message {
        direction: Direction,
        msg_type: String,
        data: Value,
        at: WireTime,
    },
    Event {
        name: String,
        data: Value,
    },
}

/// Reporter that keeps everything it is given
#[derive(Debug, Default)]
pub struct CollectingReporter {
    entries: Mutex<Vec<Reported>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Reported> {
        self.entries.lock().clone()
    }

    /// Types of messages that went in `direction`, in order
    pub fn message_types(&self, direction: Direction) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                Reported::Message {
                    direction: d,
                    msg_type,
                    ..
                } if *d == direction => Some(msg_type.clone()),
                _ => None,
            })
            .collect()
    }

    /// Data of every event called `name`
    pub fn events(&self, name: &str) -> Vec<Value> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                Reported::Event { name: n, data } if n == name => Some(data.clone()),
                _ => None,
            })
            .collect()
    }
}

impl MessageReporter for CollectingReporter {
    fn report(&self, message: &HostMessage, _raw: &str, direction: Direction, at: WireTime) {
        self.entries.lock().push(Reported::Message {
            direction,
            msg_type: message.msg_type.clone(),
            data: message.data.clone(),
            at,
        });
    }

    fn report_event(&self, name: &str, data: &Value) {
        self.entries.lock().push(Reported::Event {
            name: name.to_string(),
            data: data.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collecting_reporter_filters() {
        let reporter = CollectingReporter::new();
        reporter.report(&HostMessage::new("CONNECTED"), "", Direction::Sent, WireTime::now());
        reporter.report(&HostMessage::new("CONNECTED_OK"), "", Direction::Received, WireTime::now());
        reporter.report_event("latency check", &json!({"max_latency": 1.5}));

        assert_eq!(reporter.message_types(Direction::Sent), vec!["CONNECTED"]);
        assert_eq!(reporter.message_types(Direction::Received), vec!["CONNECTED_OK"]);
        assert_eq!(reporter.events("latency check"), vec![json!({"max_latency": 1.5})]);
        assert_eq!(reporter.entries().len(), 3);
    }
}

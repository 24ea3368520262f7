//! Host PC messages

use hostlink_core::WireTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Control message types of the host PC protocol
pub mod types {
    pub const CONNECTED: &str = "CONNECTED";
    pub const CONNECTED_OK: &str = "CONNECTED_OK";
    pub const CONFIGURE: &str = "CONFIGURE";
    pub const CONFIGURE_OK: &str = "CONFIGURE_OK";
    pub const READY: &str = "READY";
    pub const START: &str = "START";
    pub const HEARTBEAT: &str = "HEARTBEAT";
    pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";
    pub const EXIT: &str = "EXIT";
    pub const SYNC_PULSE: &str = "NSBSYNCPULSE";

    /// Any type containing this marker reports a host-side failure
    pub const ERROR_MARKER: &str = "ERROR";
}

/// One message on the wire
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(
        default = "WireTime::now",
        serialize_with = "serialize_time",
        deserialize_with = "deserialize_time"
    )]
    pub time: WireTime,
    #[serde(default = "empty_object", deserialize_with = "deserialize_data")]
    pub data: Value,
}

impl HostMessage {
    /// Message stamped with the current wall clock and empty data
    pub fn new(msg_type: impl Into<String>) -> Self {
        HostMessage {
            msg_type: msg_type.into(),
            time: WireTime::now(),
            data: empty_object(),
        }
    }

    /// Replace the payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = if data.is_null() { empty_object() } else { data };
        self
    }

    /// Set one field of an object payload
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.data.is_object() {
            self.data = empty_object();
        }
        if let Value::Object(map) = &mut self.data {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn at(mut self, time: WireTime) -> Self {
        self.time = time;
        self
    }

    /// Field of an object payload
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn is_type(&self, msg_type: &str) -> bool {
        self.msg_type == msg_type
    }

    /// Host-side failure report
    pub fn is_error(&self) -> bool {
        self.msg_type.contains(types::ERROR_MARKER)
    }

    pub fn is_exit(&self) -> bool {
        self.msg_type == types::EXIT
    }

    /// Messages that end the session when received
    pub fn is_fatal(&self) -> bool {
        self.is_error() || self.is_exit()
    }
}

/// A decoded message with its receive metadata
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub message: HostMessage,
    /// Task-PC wall clock when the line arrived
    pub received_at: WireTime,
    /// Line as read from the stream
    pub raw: String,
}

impl InboundMessage {
    pub fn msg_type(&self) -> &str {
        &self.message.msg_type
    }
}

/// Which way a reported message travelled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn serialize_time<S: Serializer>(time: &WireTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(time.as_secs_f64())
}

fn deserialize_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<WireTime, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() {
        return Err(serde::de::Error::custom("time is not a finite number"));
    }
    Ok(WireTime::from_secs_f64(secs))
}

fn deserialize_data<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
    let data = Value::deserialize(deserializer)?;
    Ok(if data.is_null() { empty_object() } else { data })
}

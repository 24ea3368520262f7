//! hostlink Wire - Host PC message format
//!
//! Every message is one JSON object on its own line:
//!
//! ```text
//! {"type": "HEARTBEAT", "time": 1700000000.123456, "data": {"count": 3}}\n
//! ```
//!
//! - `type`: message type, upper case by convention
//! - `time`: sender wall clock, float seconds since the Unix epoch
//! - `data`: free-form payload, an empty object when absent

pub mod codec;
pub mod message;

pub use codec::*;
pub use message::*;

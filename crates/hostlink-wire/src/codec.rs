//! Line-delimited JSON codec

use bytes::{Buf, BytesMut};
use hostlink_core::{HostlinkError, HostlinkResult, WireTime};
use serde_json::Value;

use crate::{HostMessage, InboundMessage};

/// Longest line accepted before the buffer gives up on finding a newline
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Serializer for host PC messages
#[derive(Clone, Copy, Debug, Default)]
pub struct LineCodec;

impl LineCodec {
    /// Encode a message as one line, without the trailing newline
    pub fn encode(message: &HostMessage) -> HostlinkResult<String> {
        serde_json::to_string(message).map_err(|e| HostlinkError::Codec(e.to_string()))
    }

    /// Decode one line. Blank lines, non-objects and objects without a
    /// string `type` are rejected.
    pub fn decode(line: &str) -> HostlinkResult<HostMessage> {
        let line = line.trim();
        if line.is_empty() {
            return Err(HostlinkError::Codec("empty line".into()));
        }
        let value: Value =
            serde_json::from_str(line).map_err(|e| HostlinkError::Codec(e.to_string()))?;
        match value.get("type") {
            Some(Value::String(_)) => {}
            Some(_) => return Err(HostlinkError::Codec("message type is not a string".into())),
            None => return Err(HostlinkError::Codec("message has no type".into())),
        }
        serde_json::from_value(value).map_err(|e| HostlinkError::Codec(e.to_string()))
    }

    /// Decode a line and stamp it with the receive time
    pub fn decode_inbound(line: &str, received_at: WireTime) -> HostlinkResult<InboundMessage> {
        Ok(InboundMessage {
            message: Self::decode(line)?,
            received_at,
            raw: line.to_string(),
        })
    }
}

/// Splits a byte stream into lines, buffering partial ones
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered without a terminating newline yet
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete line, without its `\n` or `\r\n`.
    /// A line that is not UTF-8, or an oversized partial line, is dropped
    /// and reported as a codec error.
    pub fn next_line(&mut self) -> Option<HostlinkResult<String>> {
        let Some(end) = self.buf.iter().position(|b| *b == b'\n') else {
            if self.buf.len() > MAX_LINE_LEN {
                let dropped = self.buf.len();
                self.buf.clear();
                return Some(Err(HostlinkError::Codec(format!(
                    "line exceeds {} bytes without a newline ({} dropped)",
                    MAX_LINE_LEN, dropped
                ))));
            }
            return None;
        };
        let mut line = self.buf.split_to(end);
        self.buf.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(
            String::from_utf8(line.to_vec())
                .map_err(|e| HostlinkError::Codec(format!("line is not UTF-8: {}", e))),
        )
    }

    /// Take whatever is buffered at end of stream
    pub fn take_remainder(&mut self) -> Option<HostlinkResult<String>> {
        if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
            self.buf.clear();
            return None;
        }
        let rest = self.buf.split();
        tracing::debug!(bytes = rest.len(), "stream ended mid-line");
        Some(
            String::from_utf8(rest.to_vec())
                .map_err(|e| HostlinkError::Codec(format!("line is not UTF-8: {}", e))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_encode_shape() {
        let msg = HostMessage::new("HEARTBEAT")
            .with_field("count", 2)
            .at(WireTime::from_millis(1_700_000_000_250));
        let line = LineCodec::encode(&msg).unwrap();
        assert!(!line.contains('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "HEARTBEAT");
        assert_eq!(value["data"], json!({"count": 2}));
        assert!((value["time"].as_f64().unwrap() - 1_700_000_000.25).abs() < 1e-6);
    }

    #[test]
    fn test_decode_host_reply() {
        let msg = LineCodec::decode(r#"{"type":"CONFIGURE_OK","time":12.5,"data":{"stim":true}}"#)
            .unwrap();
        assert!(msg.is_type("CONFIGURE_OK"));
        assert_eq!(msg.time.as_millis(), 12_500);
        assert_eq!(msg.field("stim"), Some(&json!(true)));
    }

    #[test]
    fn test_decode_defaults_missing_fields() {
        let msg = LineCodec::decode(r#"{"type":"START"}"#).unwrap();
        assert_eq!(msg.data, json!({}));

        let msg = LineCodec::decode(r#"{"type":"START","data":null}"#).unwrap();
        assert_eq!(msg.data, json!({}));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for line in [
            "",
            "   ",
            "not json",
            "[1,2,3]",
            r#"{"time": 1.0}"#,
            r#"{"type": 5}"#,
            r#"{"type": "X", "time": "yesterday"}"#,
        ] {
            assert!(
                matches!(LineCodec::decode(line), Err(HostlinkError::Codec(_))),
                "accepted {:?}",
                line
            );
        }
    }

    #[test]
    fn test_decode_inbound_keeps_raw_line() {
        let raw = r#"{"type":"START","time":1.0,"data":{}}"#;
        let inbound = LineCodec::decode_inbound(raw, WireTime::from_millis(5)).unwrap();
        assert_eq!(inbound.raw, raw);
        assert_eq!(inbound.msg_type(), "START");
        assert_eq!(inbound.received_at, WireTime::from_millis(5));
    }

    #[test]
    fn test_line_buffer_partial_and_multiple() {
        let mut buf = LineBuffer::new();
        buf.extend(b"{\"type\":\"A\"}\n{\"ty");
        assert_eq!(buf.next_line().unwrap().unwrap(), "{\"type\":\"A\"}");
        assert!(buf.next_line().is_none());

        buf.extend(b"pe\":\"B\"}\r\n{\"type\":\"C\"}\n");
        assert_eq!(buf.next_line().unwrap().unwrap(), "{\"type\":\"B\"}");
        assert_eq!(buf.next_line().unwrap().unwrap(), "{\"type\":\"C\"}");
        assert!(buf.next_line().is_none());
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_line_buffer_invalid_utf8_line_dropped() {
        let mut buf = LineBuffer::new();
        buf.extend(&[0xff, 0xfe, b'\n']);
        buf.extend(b"ok\n");
        assert!(matches!(buf.next_line(), Some(Err(HostlinkError::Codec(_)))));
        assert_eq!(buf.next_line().unwrap().unwrap(), "ok");
    }

    #[test]
    fn test_line_buffer_oversized_line() {
        let mut buf = LineBuffer::new();
        buf.extend(&vec![b'x'; MAX_LINE_LEN + 1]);
        assert!(matches!(buf.next_line(), Some(Err(HostlinkError::Codec(_)))));
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_take_remainder() {
        let mut buf = LineBuffer::new();
        buf.extend(b"  \n");
        assert_eq!(buf.next_line().unwrap().unwrap(), "  ");
        assert!(buf.take_remainder().is_none());

        buf.extend(b"{\"type\":\"EXIT\"}");
        assert_eq!(buf.take_remainder().unwrap().unwrap(), "{\"type\":\"EXIT\"}");
    }

    proptest! {
        #[test]
        fn prop_lines_survive_arbitrary_chunking(
            lines in prop::collection::vec("[a-zA-Z0-9 {}:\",]{0,40}", 1..8),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let stream: String = lines.iter().map(|l| format!("{}\n", l)).collect();
            let bytes = stream.as_bytes();
            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
            points.push(0);
            points.push(bytes.len());
            points.sort_unstable();
            points.dedup();

            let mut buf = LineBuffer::new();
            let mut out = Vec::new();
            for pair in points.windows(2) {
                buf.extend(&bytes[pair[0]..pair[1]]);
                while let Some(line) = buf.next_line() {
                    out.push(line.unwrap());
                }
            }
            prop_assert_eq!(out, lines);
        }
    }
}

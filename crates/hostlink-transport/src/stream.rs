//! Stream abstraction shared by every transport

use std::sync::Arc;
use std::time::Duration;

use hostlink_core::{HostlinkError, HostlinkResult};
use hostlink_wire::LineBuffer;

/// Something that happened on the read side of a stream
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// One complete line, without its terminator
    Line(String),
    /// A read or framing failure; reading continues unless followed by `Closed`
    Error(HostlinkError),
    /// The peer closed the stream; no further events follow
    Closed,
}

/// Callback invoked on the reader for every stream event
pub type StreamHandler = Box<dyn FnMut(StreamEvent) + Send + 'static>;

/// Bidirectional line stream to the host PC
pub trait HostStream: Send + Sync {
    /// Write one line; the terminator is appended
    fn write_line(&self, line: &str) -> HostlinkResult<()>;

    /// Start delivering read events to `handler`. Callable once.
    fn start_reading(&self, handler: StreamHandler) -> HostlinkResult<()>;

    /// Close both directions and stop the reader. Idempotent.
    fn shutdown(&self);

    fn is_open(&self) -> bool;

    /// Human-readable peer description for logs
    fn peer(&self) -> String;
}

/// Opens streams to the host PC
pub trait Connector: Send + Sync {
    fn connect(&self, timeout: Duration) -> HostlinkResult<Arc<dyn HostStream>>;

    fn describe(&self) -> String;
}

/// Feed raw bytes through `buffer`, emitting one event per complete line
pub(crate) fn emit_lines(buffer: &mut LineBuffer, bytes: &[u8], handler: &mut StreamHandler) {
    buffer.extend(bytes);
    while let Some(line) = buffer.next_line() {
        match line {
            Ok(line) => handler(StreamEvent::Line(line)),
            Err(err) => handler(StreamEvent::Error(err)),
        }
    }
}

/// Flush a trailing partial line, then report end of stream
pub(crate) fn emit_closed(buffer: &mut LineBuffer, handler: &mut StreamHandler) {
    match buffer.take_remainder() {
        Some(Ok(line)) => handler(StreamEvent::Line(line)),
        Some(Err(err)) => handler(StreamEvent::Error(err)),
        None => {}
    }
    handler(StreamEvent::Closed);
}

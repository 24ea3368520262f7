//! In-memory duplex streams
//!
//! Two connected ends, each delivering what the other writes. Bytes go
//! through the same line splitting as TCP, so partial writes behave alike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hostlink_core::{HostlinkError, HostlinkResult};
use hostlink_wire::LineBuffer;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::stream::{emit_closed, emit_lines, Connector, HostStream, StreamHandler};

enum Packet {
    Bytes(Vec<u8>),
    Eof,
}

/// One end of an in-memory duplex stream
pub struct MemoryHostStream {
    name: String,
    /// Feeds the other end's reader
    peer_tx: Mutex<Option<UnboundedSender<Packet>>>,
    /// Feeds our own reader; used to stop it on shutdown
    self_tx: UnboundedSender<Packet>,
    inbox: Mutex<Option<UnboundedReceiver<Packet>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    open: Arc<AtomicBool>,
}

impl MemoryHostStream {
    /// Create two connected ends
    pub fn pair(a: &str, b: &str) -> (MemoryHostStream, MemoryHostStream) {
        let (a_tx, a_rx) = unbounded_channel();
        let (b_tx, b_rx) = unbounded_channel();
        let left = MemoryHostStream {
            name: a.to_string(),
            peer_tx: Mutex::new(Some(b_tx.clone())),
            self_tx: a_tx.clone(),
            inbox: Mutex::new(Some(a_rx)),
            reader: Mutex::new(None),
            open: Arc::new(AtomicBool::new(true)),
        };
        let right = MemoryHostStream {
            name: b.to_string(),
            peer_tx: Mutex::new(Some(a_tx)),
            self_tx: b_tx,
            inbox: Mutex::new(Some(b_rx)),
            reader: Mutex::new(None),
            open: Arc::new(AtomicBool::new(true)),
        };
        (left, right)
    }

    /// Write raw bytes, no terminator added
    pub fn write_raw(&self, bytes: &[u8]) -> HostlinkResult<()> {
        if !self.is_open() {
            return Err(HostlinkError::TransportError(format!(
                "{} is closed",
                self.name
            )));
        }
        let guard = self.peer_tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| HostlinkError::TransportError("peer closed".into()))?;
        tx.send(Packet::Bytes(bytes.to_vec()))
            .map_err(|_| HostlinkError::TransportError("peer closed".into()))
    }

    /// Wait for the reader thread to finish
    pub fn join_reader(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let finished = self
                .reader
                .lock()
                .as_ref()
                .map_or(true, |handle| handle.is_finished());
            if finished {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl HostStream for MemoryHostStream {
    fn write_line(&self, line: &str) -> HostlinkResult<()> {
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        self.write_raw(&framed)
    }

    fn start_reading(&self, mut handler: StreamHandler) -> HostlinkResult<()> {
        let mut inbox = self
            .inbox
            .lock()
            .take()
            .ok_or_else(|| HostlinkError::invalid_state("reader already started"))?;
        let open = self.open.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-reader", self.name))
            .spawn(move || {
                let mut buffer = LineBuffer::new();
                while let Some(Packet::Bytes(bytes)) = inbox.blocking_recv() {
                    emit_lines(&mut buffer, &bytes, &mut handler);
                }
                open.store(false, Ordering::Release);
                emit_closed(&mut buffer, &mut handler);
            })
            .map_err(|e| HostlinkError::TransportError(format!("reader thread: {}", e)))?;
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
        if let Some(tx) = self.peer_tx.lock().take() {
            let _ = tx.send(Packet::Eof);
        }
        let _ = self.self_tx.send(Packet::Eof);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn peer(&self) -> String {
        format!("memory:{}", self.name)
    }
}

impl Drop for MemoryHostStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

type StreamFactory = dyn Fn() -> HostlinkResult<MemoryHostStream> + Send + Sync;

/// Connector producing in-memory streams from a factory
pub struct MemoryConnector {
    factory: Box<StreamFactory>,
}

impl MemoryConnector {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> HostlinkResult<MemoryHostStream> + Send + Sync + 'static,
    {
        MemoryConnector {
            factory: Box::new(factory),
        }
    }

    /// Connector whose every attempt fails
    pub fn refusing() -> Self {
        Self::new(|| Err(HostlinkError::ConnectionFailed("connection refused".into())))
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, _timeout: Duration) -> HostlinkResult<Arc<dyn HostStream>> {
        Ok(Arc::new((self.factory)()?))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamEvent;
    use std::sync::mpsc;

    fn collect(stream: &MemoryHostStream) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel();
        stream
            .start_reading(Box::new(move |event| {
                let _ = tx.send(event);
            }))
            .unwrap();
        rx
    }

    fn wait() -> Duration {
        Duration::from_secs(5)
    }

    #[test]
    fn test_lines_cross_between_ends() {
        let (task, host) = MemoryHostStream::pair("task", "host");
        let at_host = collect(&host);
        let at_task = collect(&task);

        task.write_line("one").unwrap();
        host.write_raw(b"tw").unwrap();
        host.write_raw(b"o\nthree\n").unwrap();

        assert_eq!(at_host.recv_timeout(wait()).unwrap(), StreamEvent::Line("one".into()));
        assert_eq!(at_task.recv_timeout(wait()).unwrap(), StreamEvent::Line("two".into()));
        assert_eq!(at_task.recv_timeout(wait()).unwrap(), StreamEvent::Line("three".into()));
    }

    #[test]
    fn test_shutdown_closes_both_readers() {
        let (task, host) = MemoryHostStream::pair("task", "host");
        let at_host = collect(&host);
        let at_task = collect(&task);

        host.shutdown();
        assert_eq!(at_task.recv_timeout(wait()).unwrap(), StreamEvent::Closed);
        assert_eq!(at_host.recv_timeout(wait()).unwrap(), StreamEvent::Closed);
        assert!(task.join_reader(wait()));
        assert!(!task.is_open());
        assert!(task.write_line("late").is_err());
    }

    #[test]
    fn test_drop_closes_peer() {
        let (task, host) = MemoryHostStream::pair("task", "host");
        let at_task = collect(&task);
        drop(host);
        assert_eq!(at_task.recv_timeout(wait()).unwrap(), StreamEvent::Closed);
    }

    #[test]
    fn test_second_reader_rejected() {
        let (task, _host) = MemoryHostStream::pair("task", "host");
        let _events = collect(&task);
        assert!(matches!(
            task.start_reading(Box::new(|_| {})),
            Err(HostlinkError::InvalidState(_))
        ));
    }

    #[test]
    fn test_refusing_connector() {
        let connector = MemoryConnector::refusing();
        assert!(matches!(
            connector.connect(wait()),
            Err(HostlinkError::ConnectionFailed(_))
        ));
    }
}

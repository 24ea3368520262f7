//! TCP transport
//!
//! Each stream owns a small tokio runtime. The reader runs as a task on that
//! runtime; writes block the calling thread on the same runtime. Calls must
//! come from plain OS threads, never from inside an async context.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostlink_core::{HostlinkError, HostlinkResult};
use hostlink_wire::LineBuffer;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::stream::{emit_closed, emit_lines, Connector, HostStream, StreamEvent, StreamHandler};

/// Read chunk size
const READ_CHUNK: usize = 4096;

/// TCP line stream
pub struct TcpHostStream {
    runtime: Option<Runtime>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    open: Arc<AtomicBool>,
    peer: SocketAddr,
}

impl TcpHostStream {
    /// Connect to `addr` ("host:port"), giving up after `timeout`
    pub fn connect(addr: &str, timeout: Duration) -> HostlinkResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("hostlink-io")
            .enable_all()
            .build()
            .map_err(|e| HostlinkError::TransportError(format!("io runtime: {}", e)))?;

        let stream = runtime
            .block_on(async { tokio::time::timeout(timeout, TcpStream::connect(addr)).await })
            .map_err(|_| {
                HostlinkError::ConnectionFailed(format!(
                    "connecting to {} timed out after {:?}",
                    addr, timeout
                ))
            })?
            .map_err(|e| HostlinkError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr, error = %e, "could not disable Nagle");
        }
        let peer = stream
            .peer_addr()
            .map_err(|e| HostlinkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        let (read, write) = stream.into_split();
        tracing::info!(%peer, "connected to host PC");

        Ok(TcpHostStream {
            runtime: Some(runtime),
            writer: tokio::sync::Mutex::new(Some(write)),
            reader: Mutex::new(Some(read)),
            reader_task: Mutex::new(None),
            open: Arc::new(AtomicBool::new(true)),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn runtime(&self) -> HostlinkResult<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| HostlinkError::TransportError("stream runtime is gone".into()))
    }
}

impl HostStream for TcpHostStream {
    fn write_line(&self, line: &str) -> HostlinkResult<()> {
        if !self.is_open() {
            return Err(HostlinkError::TransportError(format!(
                "stream to {} is closed",
                self.peer
            )));
        }
        let runtime = self.runtime()?;
        runtime.block_on(async {
            let mut writer = self.writer.lock().await;
            let half = writer
                .as_mut()
                .ok_or_else(|| HostlinkError::TransportError("write half closed".into()))?;
            let mut framed = Vec::with_capacity(line.len() + 1);
            framed.extend_from_slice(line.as_bytes());
            framed.push(b'\n');
            half.write_all(&framed)
                .await
                .map_err(|e| HostlinkError::TransportError(e.to_string()))?;
            half.flush()
                .await
                .map_err(|e| HostlinkError::TransportError(e.to_string()))
        })
    }

    fn start_reading(&self, mut handler: StreamHandler) -> HostlinkResult<()> {
        let mut read = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| HostlinkError::invalid_state("reader already started"))?;
        let open = self.open.clone();
        let peer = self.peer;

        let task = self.runtime()?.spawn(async move {
            let mut buffer = LineBuffer::new();
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                match read.read(&mut chunk).await {
                    Ok(0) => {
                        tracing::debug!(%peer, "host PC closed the stream");
                        break;
                    }
                    Ok(n) => emit_lines(&mut buffer, &chunk[..n], &mut handler),
                    Err(e) => {
                        tracing::warn!(%peer, error = %e, "TCP receive error");
                        handler(StreamEvent::Error(HostlinkError::TransportError(
                            e.to_string(),
                        )));
                        break;
                    }
                }
            }
            open.store(false, Ordering::Release);
            emit_closed(&mut buffer, &mut handler);
        });
        *self.reader_task.lock() = Some(task);
        Ok(())
    }

    fn shutdown(&self) {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };
        runtime.block_on(async {
            if let Some(mut half) = self.writer.lock().await.take() {
                let _ = half.shutdown().await;
            }
        });
        if was_open {
            tracing::info!(peer = %self.peer, "stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

impl Drop for TcpHostStream {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Opens TCP streams to a fixed address
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, timeout: Duration) -> HostlinkResult<Arc<dyn HostStream>> {
        Ok(Arc::new(TcpHostStream::connect(&self.addr, timeout)?))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

//! TCP connection implementation over tokio.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::connection::{CloseHook, Connection};
use crate::error::{Result, TransportError};

const READ_CHUNK_SIZE: usize = 8192;

/// A single TCP connection with concurrent read/write support.
///
/// Read and write halves live under separate async mutexes so one task can
/// read while another writes. Close hooks run exactly once, on the first
/// `dispose`.
pub struct TcpConnection {
    read: Mutex<OwnedReadHalf>,
    write: Mutex<OwnedWriteHalf>,
    remote: SocketAddr,
    read_timeout: Duration,
    write_timeout: Duration,
    closed: AtomicBool,
    hooks: StdMutex<Vec<CloseHook>>,
}

impl TcpConnection {
    /// Establishes a TCP connection to `addr`, bounded by `connect_timeout`.
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectFailure {
                addr,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|e| TransportError::ConnectFailure { addr, source: e })?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        tracing::debug!(addr = %addr, "TCP connected");
        Ok(Self::from_stream(stream, addr, read_timeout, write_timeout))
    }

    pub(crate) fn from_stream(
        stream: tokio::net::TcpStream,
        remote: SocketAddr,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        let (read, write) = stream.into_split();
        Self {
            read: Mutex::new(read),
            write: Mutex::new(write),
            remote,
            read_timeout,
            write_timeout,
            closed: AtomicBool::new(false),
            hooks: StdMutex::new(Vec::new()),
        }
    }

    fn run_hooks(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(|e| e.into_inner()));
        for hook in hooks {
            hook();
        }
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.run_hooks();
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn is_tcp(&self) -> bool {
        true
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut write = self.write.lock().await;
        let result = tokio::time::timeout(self.write_timeout, async {
            write.write_all(buf).await?;
            write.flush().await
        })
        .await;
        drop(write);
        match result {
            Ok(Ok(())) => Ok(buf.len()),
            Ok(Err(e)) => {
                self.mark_closed();
                Err(TransportError::Io(e))
            }
            Err(_) => {
                self.mark_closed();
                Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timed out",
                )))
            }
        }
    }

    async fn read(&self) -> Result<Bytes> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut read = self.read.lock().await;
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let result = tokio::time::timeout(self.read_timeout, read.read_buf(&mut buf)).await;
        drop(read);
        match result {
            Ok(Ok(0)) => {
                self.mark_closed();
                Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed connection",
                )))
            }
            Ok(Ok(_)) => Ok(buf.freeze()),
            Ok(Err(e)) => {
                self.mark_closed();
                Err(TransportError::Io(e))
            }
            Err(_) => {
                self.mark_closed();
                Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "read timed out",
                )))
            }
        }
    }

    async fn dispose(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.run_hooks();
        let mut write = self.write.lock().await;
        let _ = write.shutdown().await;
    }

    fn on_before_close(&self, hook: CloseHook) {
        if self.is_open() {
            self.hooks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(hook);
        } else {
            // Already closed: honor the exactly-once contract by running now.
            hook();
        }
    }
}

//! Connected UDP socket satisfying the [`Connection`] trait.
//!
//! UDP connections are never pooled; the transport disposes them on release.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;

use crate::connection::{CloseHook, Connection};
use crate::error::{Result, TransportError};

const MAX_DATAGRAM_SIZE: usize = 65_507;

/// A connected UDP socket.
pub struct UdpConnection {
    socket: UdpSocket,
    remote: SocketAddr,
    read_timeout: Duration,
    write_timeout: Duration,
    closed: AtomicBool,
    hooks: StdMutex<Vec<CloseHook>>,
}

impl UdpConnection {
    /// Binds an ephemeral local socket and connects it to `addr`.
    pub async fn connect(
        addr: SocketAddr,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self> {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::ConnectFailure { addr, source: e })?;
        socket
            .connect(addr)
            .await
            .map_err(|e| TransportError::ConnectFailure { addr, source: e })?;
        tracing::debug!(addr = %addr, "UDP connected");
        Ok(Self {
            socket,
            remote: addr,
            read_timeout,
            write_timeout,
            closed: AtomicBool::new(false),
            hooks: StdMutex::new(Vec::new()),
        })
    }

    fn run_hooks(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(|e| e.into_inner()));
        for hook in hooks {
            hook();
        }
    }
}

#[async_trait]
impl Connection for UdpConnection {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn is_tcp(&self) -> bool {
        false
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        tokio::time::timeout(self.write_timeout, self.socket.send(buf))
            .await
            .map_err(|_| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "send timed out",
                ))
            })?
            .map_err(TransportError::Io)
    }

    async fn read(&self) -> Result<Bytes> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut buf = BytesMut::zeroed(MAX_DATAGRAM_SIZE);
        let n = tokio::time::timeout(self.read_timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "recv timed out",
                ))
            })?
            .map_err(TransportError::Io)?;
        buf.truncate(n);
        Ok(buf.freeze())
    }

    async fn dispose(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.run_hooks();
    }

    fn on_before_close(&self, hook: CloseHook) {
        if self.is_open() {
            self.hooks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(hook);
        } else {
            hook();
        }
    }
}

//! Test doubles: a scripted connector and connection for exercising the
//! pooling core without real sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::connection::{CloseHook, Connection, Connector};
use crate::error::{Result, TransportError};

static TRACING: std::sync::Once = std::sync::Once::new();

/// Installs a fmt subscriber honoring `RUST_LOG`, once per test binary.
pub(crate) fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Shared observable state of a [`MockConnection`].
pub(crate) struct MockHandle {
    open: AtomicBool,
    disposed: AtomicUsize,
}

impl MockHandle {
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub(crate) fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// In-memory connection: writes succeed, reads return a fixed payload.
pub(crate) struct MockConnection {
    remote: SocketAddr,
    tcp: bool,
    read_payload: Bytes,
    io_fail: bool,
    handle: Arc<MockHandle>,
    hooks: Mutex<Vec<CloseHook>>,
}

impl MockConnection {
    pub(crate) fn tcp(remote: SocketAddr) -> (Self, Arc<MockHandle>) {
        Self::new(remote, true, Bytes::from_static(b"pong"))
    }

    pub(crate) fn new(
        remote: SocketAddr,
        tcp: bool,
        read_payload: Bytes,
    ) -> (Self, Arc<MockHandle>) {
        let handle = Arc::new(MockHandle {
            open: AtomicBool::new(true),
            disposed: AtomicUsize::new(0),
        });
        (
            Self {
                remote,
                tcp,
                read_payload,
                io_fail: false,
                handle: handle.clone(),
                hooks: Mutex::new(Vec::new()),
            },
            handle,
        )
    }
}

fn scripted_io_error() -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "scripted i/o failure",
    ))
}

#[async_trait]
impl Connection for MockConnection {
    fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn is_tcp(&self) -> bool {
        self.tcp
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if self.io_fail {
            return Err(scripted_io_error());
        }
        Ok(buf.len())
    }

    async fn read(&self) -> Result<Bytes> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if self.io_fail {
            return Err(scripted_io_error());
        }
        Ok(self.read_payload.clone())
    }

    async fn dispose(&self) {
        if self.handle.open.swap(false, Ordering::SeqCst) {
            self.handle.disposed.fetch_add(1, Ordering::SeqCst);
            let hooks = std::mem::take(&mut *self.hooks.lock().unwrap());
            for hook in hooks {
                hook();
            }
        }
    }

    fn on_before_close(&self, hook: CloseHook) {
        if self.is_open() {
            self.hooks.lock().unwrap().push(hook);
        } else {
            hook();
        }
    }
}

/// Connector with per-address scripted outcomes and connect counters.
#[derive(Default)]
pub(crate) struct MockConnector {
    failing: DashMap<SocketAddr, bool>,
    io_failing: DashMap<SocketAddr, bool>,
    delays: DashMap<SocketAddr, Duration>,
    connects: DashMap<SocketAddr, usize>,
    handles: Mutex<Vec<(SocketAddr, Arc<MockHandle>)>>,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks an address as refusing connections.
    pub(crate) fn set_failing(&self, addr: SocketAddr, failing: bool) {
        self.failing.insert(addr, failing);
    }

    /// Makes connections created for an address fail read/write.
    pub(crate) fn set_io_failing(&self, addr: SocketAddr, failing: bool) {
        self.io_failing.insert(addr, failing);
    }

    /// Adds an artificial connect delay for an address.
    pub(crate) fn set_delay(&self, addr: SocketAddr, delay: Duration) {
        self.delays.insert(addr, delay);
    }

    /// Number of connect attempts seen for an address.
    pub(crate) fn connect_count(&self, addr: SocketAddr) -> usize {
        self.connects.get(&addr).map(|c| *c).unwrap_or(0)
    }

    /// Handles of every connection created, in creation order.
    pub(crate) fn handles(&self) -> Vec<(SocketAddr, Arc<MockHandle>)> {
        self.handles.lock().unwrap().clone()
    }

    async fn create(&self, addr: SocketAddr, tcp: bool) -> Result<Box<dyn Connection>> {
        *self.connects.entry(addr).or_insert(0) += 1;
        if let Some(delay) = self.delays.get(&addr).map(|d| *d) {
            tokio::time::sleep(delay).await;
        }
        if self.failing.get(&addr).map(|f| *f).unwrap_or(false) {
            return Err(TransportError::ConnectFailure {
                addr,
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "scripted refusal",
                ),
            });
        }
        let (mut conn, handle) = MockConnection::new(addr, tcp, Bytes::from_static(b"pong"));
        conn.io_fail = self.io_failing.get(&addr).map(|f| *f).unwrap_or(false);
        self.handles.lock().unwrap().push((addr, handle));
        Ok(Box::new(conn))
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn create_tcp(
        &self,
        addr: SocketAddr,
        _read_timeout: Duration,
        _write_timeout: Duration,
    ) -> Result<Box<dyn Connection>> {
        self.create(addr, true).await
    }

    async fn create_udp(
        &self,
        addr: SocketAddr,
        _read_timeout: Duration,
        _write_timeout: Duration,
    ) -> Result<Box<dyn Connection>> {
        self.create(addr, false).await
    }
}

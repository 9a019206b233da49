//! Connection and connector traits — the seam between the pooling core and the
//! I/O engine that actually opens sockets.
//!
//! The pooling layer never touches `tokio::net` directly; it only sees these
//! trait objects. This keeps the transport testable with scripted connectors
//! and keeps the engine swappable.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Hook invoked exactly once, immediately before a connection closes.
///
/// The admission gate uses this to give back the permit that was consumed
/// when the connection was created.
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// An established outbound connection.
///
/// Ownership is exclusive: a connection is held by at most one of
/// {a node's idle pool, one caller} at any time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;

    /// Whether this is a TCP connection (UDP connections are never pooled).
    fn is_tcp(&self) -> bool;

    /// Remote peer address. Used as the pooling identity key.
    fn remote_addr(&self) -> SocketAddr;

    /// Write the buffer, returning the number of bytes written.
    async fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Read the next chunk of bytes from the peer.
    async fn read(&self) -> Result<Bytes>;

    /// Close the connection and run registered close hooks exactly once.
    async fn dispose(&self);

    /// Register a hook to run before the connection closes.
    fn on_before_close(&self, hook: CloseHook);
}

/// The I/O engine: creates raw connections on behalf of the transport.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a TCP connection to `addr` with the given read/write timeouts.
    async fn create_tcp(
        &self,
        addr: SocketAddr,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Box<dyn Connection>>;

    /// Open a connected UDP socket to `addr` with the given read/write timeouts.
    async fn create_udp(
        &self,
        addr: SocketAddr,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Box<dyn Connection>>;
}

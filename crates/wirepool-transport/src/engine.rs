//! Tokio-backed I/O engine.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::connection::{Connection, Connector};
use crate::error::Result;
use crate::tcp::TcpConnection;
use crate::udp::UdpConnection;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TCP connect timeout (default: 5 seconds).
    pub connect_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// [`Connector`] implementation over `tokio::net`.
#[derive(Debug, Clone, Default)]
pub struct TokioEngine {
    config: EngineConfig,
}

impl TokioEngine {
    /// Creates an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for TokioEngine {
    async fn create_tcp(
        &self,
        addr: SocketAddr,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Box<dyn Connection>> {
        let conn =
            TcpConnection::connect(addr, self.config.connect_timeout, read_timeout, write_timeout)
                .await?;
        Ok(Box::new(conn))
    }

    async fn create_udp(
        &self,
        addr: SocketAddr,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Box<dyn Connection>> {
        let conn = UdpConnection::connect(addr, read_timeout, write_timeout).await?;
        Ok(Box::new(conn))
    }
}

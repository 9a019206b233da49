//! Pluggable selection strategy.
//!
//! A configured strategy fully replaces the transport's default selection and
//! disposal policy; it is an override, not an augmentation.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::Result;
use crate::transport::GroupTransport;

/// Override of the default address-selection and disposal policy.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    /// Produces a connection for the caller. The transport returns the result
    /// unmodified.
    async fn select(
        &self,
        addr: Option<SocketAddr>,
        transport: &GroupTransport,
    ) -> Result<Box<dyn Connection>>;

    /// Takes over disposition of a returned connection. Return `None` when the
    /// strategy handled it; return the connection back to let the transport's
    /// default release path run.
    fn return_connection(
        &self,
        force_close: bool,
        conn: Box<dyn Connection>,
    ) -> Option<Box<dyn Connection>>;
}

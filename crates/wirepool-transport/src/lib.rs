#![warn(missing_docs)]

//! Pooled, load-balanced, failover client transport for named endpoint groups.
//!
//! A [`GroupTransport`] manages outbound connections to a group of remote
//! endpoints: per-endpoint idle pools, health-aware round-robin selection,
//! a race-all-nodes fallback on total outage, and an optional global
//! admission gate bounding outstanding connections. Acquisition never blocks
//! a caller thread.

pub mod admission;
pub mod connection;
pub mod engine;
pub mod error;
pub mod factory;
pub mod node;
pub mod registry;
pub mod strategy;
pub mod tcp;
pub mod transport;
pub mod udp;

#[cfg(test)]
mod testsupport;

pub use connection::{CloseHook, Connection, Connector};
pub use error::{Result, TransportError};
pub use factory::{TransportFactory, TransportOptions};
pub use strategy::SelectionStrategy;
pub use transport::{
    GroupTransport, Protocol, TransportConfig, TransportStats, WAITER_TIMEOUT,
};

//! Transport error kinds. Every failure reaches the caller through the
//! returned future; nothing is thrown across an asynchronous boundary.

use thiserror::Error;

/// Errors produced by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The I/O engine failed to connect to one endpoint. On the
    /// load-balanced path this disables the node; sibling attempts are
    /// unaffected.
    #[error("connect failed to {addr}: {source}")]
    ConnectFailure {
        /// The endpoint that refused or timed out.
        addr: std::net::SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An unaddressed acquisition was requested but the transport has no
    /// endpoint nodes.
    #[error("transport group '{group}' has no endpoints")]
    NoEndpoints {
        /// Logical group name.
        group: String,
    },

    /// The node's waiter queue is at capacity; the acquisition failed
    /// immediately without blocking.
    #[error("admission waiter queue full for {addr}")]
    AdmissionQueueFull {
        /// The node whose queue rejected the waiter.
        addr: std::net::SocketAddr,
    },

    /// A parked acquisition was not resolved within the waiter deadline.
    #[error("admission wait timed out after {timeout_ms}ms for {addr}")]
    AdmissionTimeout {
        /// The node the waiter was parked on.
        addr: std::net::SocketAddr,
        /// Deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The race-all-nodes fallback exhausted every endpoint without a
    /// single successful connect.
    #[error("no endpoint in group '{group}' could be reached")]
    AllEndpointsUnavailable {
        /// Logical group name.
        group: String,
    },

    /// Operation on a closed transport or connection.
    #[error("transport or connection is closed")]
    Closed,

    /// Engine-level I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

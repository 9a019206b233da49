//! Global admission gate bounding outstanding connections per transport.
//!
//! Permits are acquired with try semantics only — a caller thread is never
//! blocked. A permit is held for the lifetime of the gated connection and
//! given back by the connection's close hook.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Counting gate limiting total outstanding (checked out, not yet returned)
/// connections.
pub struct AdmissionGate {
    permits: Semaphore,
    limit: usize,
}

impl AdmissionGate {
    /// Creates a gate with `limit` permits.
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            permits: Semaphore::new(limit),
            limit,
        })
    }

    /// Tries to take one permit without waiting.
    pub fn try_acquire(&self) -> bool {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Gives one permit back. Called exactly once per acquired permit.
    pub fn release(&self) {
        if self.permits.available_permits() < self.limit {
            self.permits.add_permits(1);
        }
    }

    /// Number of permits currently available.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured permit limit.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("limit", &self.limit)
            .field("available", &self.available())
            .finish()
    }
}

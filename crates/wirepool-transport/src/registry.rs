//! Liveness registry of transports created by a factory.
//!
//! Holds non-owning back-references so the factory can enumerate and close
//! every live transport. Registration and unregistration are explicit, on
//! transport creation and close.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::transport::GroupTransport;

/// Explicit register/unregister registry of live transports.
#[derive(Default)]
pub struct TransportRegistry {
    entries: DashMap<u64, Weak<GroupTransport>>,
    next_id: AtomicU64,
}

impl TransportRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a transport, returning its registration id.
    pub fn register(&self, transport: &Arc<GroupTransport>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, Arc::downgrade(transport));
        id
    }

    /// Removes a registration. Idempotent.
    pub fn unregister(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Live transports, pruning entries whose transport was dropped.
    pub fn transports(&self) -> Vec<Arc<GroupTransport>> {
        let mut live = Vec::new();
        self.entries.retain(|_, weak| match weak.upgrade() {
            Some(transport) => {
                live.push(transport);
                true
            }
            None => false,
        });
        live
    }

    /// Number of registrations, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no registrations.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

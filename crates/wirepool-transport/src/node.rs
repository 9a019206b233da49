//! Per-endpoint state: health flag, idle-connection pool, waiter queue, and a
//! caller-defined attribute store.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::connection::Connection;

/// Waiter queue capacity is this multiple of the idle-pool capacity.
pub(crate) const WAITER_QUEUE_FACTOR: usize = 100;

/// A pending acquisition parked until a release hands over a connection or the
/// waiter deadline fires.
pub(crate) struct Waiter {
    pub(crate) id: u64,
    pub(crate) tx: oneshot::Sender<Box<dyn Connection>>,
}

/// State for a single remote address: bounded idle pool, bounded waiter queue,
/// a disable timestamp, and free-form attributes.
///
/// Identity is the remote address; nodes are reused across topology updates so
/// the idle pool, waiters, health, and attributes survive.
pub struct EndpointNode {
    address: SocketAddr,
    /// 0 = healthy; otherwise millis timestamp of the last connect failure.
    /// Concurrent failed connects may race on this; last writer wins.
    disabled_since: AtomicU64,
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    idle_capacity: usize,
    waiters: Mutex<VecDeque<Waiter>>,
    waiter_capacity: usize,
    next_waiter_id: AtomicU64,
    attributes: DashMap<String, Value>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl EndpointNode {
    pub(crate) fn new(idle_capacity: usize, address: SocketAddr) -> Self {
        Self {
            address,
            disabled_since: AtomicU64::new(0),
            idle: Mutex::new(VecDeque::new()),
            idle_capacity,
            waiters: Mutex::new(VecDeque::new()),
            waiter_capacity: idle_capacity * WAITER_QUEUE_FACTOR,
            next_waiter_id: AtomicU64::new(0),
            attributes: DashMap::new(),
        }
    }

    /// Remote address of this node.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Whether the node is currently eligible for round-robin selection.
    pub fn is_enabled(&self) -> bool {
        self.disabled_since.load(Ordering::Relaxed) == 0
    }

    /// Millis timestamp of the last connect failure, or 0 when healthy.
    pub fn disabled_since(&self) -> u64 {
        self.disabled_since.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_disabled(&self) {
        self.disabled_since.store(now_millis(), Ordering::Relaxed);
    }

    pub(crate) fn clear_disabled(&self) {
        self.disabled_since.store(0, Ordering::Relaxed);
    }

    /// Pops the oldest idle connection, open or not. Callers check `is_open`
    /// and dispose stale entries.
    pub(crate) fn pop_idle(&self) -> Option<Box<dyn Connection>> {
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Offers a connection to the idle pool. Returns it back when the pool is
    /// at capacity so the caller can dispose it.
    pub(crate) fn offer_idle(&self, conn: Box<dyn Connection>) -> Option<Box<dyn Connection>> {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() >= self.idle_capacity {
            return Some(conn);
        }
        idle.push_back(conn);
        None
    }

    /// Number of idle connections currently pooled.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Enqueues a waiter, returning its id, or `None` when the queue is full.
    pub(crate) fn enqueue_waiter(
        &self,
        tx: oneshot::Sender<Box<dyn Connection>>,
    ) -> Option<u64> {
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if waiters.len() >= self.waiter_capacity {
            return None;
        }
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        waiters.push_back(Waiter { id, tx });
        Some(id)
    }

    /// Removes a waiter by id. Idempotent against a concurrent resolve that
    /// already popped it.
    pub(crate) fn remove_waiter(&self, id: u64) {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|w| w.id != id);
    }

    /// Number of acquisitions currently parked on this node.
    pub fn pending_waiters(&self) -> usize {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Hands `conn` to the oldest live waiter. Waiters whose receiver is gone
    /// (already timed out) are skipped. Returns the connection back when no
    /// waiter takes it.
    pub(crate) fn resolve_waiter(
        &self,
        mut conn: Box<dyn Connection>,
    ) -> Option<Box<dyn Connection>> {
        loop {
            let waiter = self
                .waiters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match waiter {
                Some(w) => match w.tx.send(conn) {
                    Ok(()) => return None,
                    Err(back) => conn = back,
                },
                None => return Some(conn),
            }
        }
    }

    /// Disposes every idle connection.
    pub(crate) async fn dispose_idle(&self) {
        let drained: Vec<Box<dyn Connection>> = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.drain(..).collect()
        };
        for conn in drained {
            conn.dispose().await;
        }
    }

    /// Sets a caller-defined attribute, returning the previous value.
    pub fn set_attribute(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(name.into(), value)
    }

    /// Reads a caller-defined attribute.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).map(|v| v.clone())
    }

    /// Removes a caller-defined attribute, returning it.
    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.remove(name).map(|(_, v)| v)
    }

    /// Clears all caller-defined attributes.
    pub fn clear_attributes(&self) {
        self.attributes.clear();
    }
}

impl std::fmt::Debug for EndpointNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointNode")
            .field("address", &self.address)
            .field("disabled_since", &self.disabled_since())
            .field("idle", &self.idle_len())
            .field("waiters", &self.pending_waiters())
            .finish()
    }
}

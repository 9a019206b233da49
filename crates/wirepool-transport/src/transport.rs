//! Group transport: pooled, load-balanced, failover client connections to a
//! named group of remote endpoints.
//!
//! The transport owns an atomically-swapped snapshot of endpoint nodes, an
//! optional global admission gate, and an optional selection-strategy
//! override. Acquisition never blocks the calling thread; when neither an
//! idle connection nor an admission permit is available the caller is parked
//! as a waiter and resolved by a later release or by the waiter deadline.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::admission::AdmissionGate;
use crate::connection::{Connection, Connector};
use crate::error::{Result, TransportError};
use crate::node::EndpointNode;
use crate::registry::TransportRegistry;
use crate::strategy::SelectionStrategy;

/// Deadline for a parked acquisition waiter.
pub const WAITER_TIMEOUT: Duration = Duration::from_secs(10);

/// Network protocol of a transport, immutable per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Stream connections, pooled and reused.
    Tcp,
    /// Datagram connections, never pooled.
    Udp,
}

impl Protocol {
    /// Whether this is the TCP protocol.
    pub fn is_tcp(self) -> bool {
        matches!(self, Protocol::Tcp)
    }
}

/// Per-transport tuning knobs, supplied by the factory layer.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Read timeout applied to created connections (default: 6 seconds).
    pub read_timeout: Duration,
    /// Write timeout applied to created connections (default: 6 seconds).
    pub write_timeout: Duration,
    /// Idle-pool capacity per endpoint node (default: 16).
    pub pool_max_idle_per_node: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(6),
            write_timeout: Duration::from_secs(6),
            pool_max_idle_per_node: 16,
        }
    }
}

/// Point-in-time counts across the transport's nodes.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Number of endpoint nodes.
    pub endpoints: usize,
    /// Nodes currently eligible for round-robin selection.
    pub healthy_endpoints: usize,
    /// Idle connections pooled across all nodes.
    pub idle_connections: usize,
    /// Acquisitions parked across all nodes.
    pub pending_waiters: usize,
}

/// Client transport for a named group of remote endpoints.
pub struct GroupTransport {
    name: String,
    protocol: Protocol,
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    client_addr: Option<SocketAddr>,
    strategy: Option<Arc<dyn SelectionStrategy>>,
    admission: Option<Arc<AdmissionGate>>,
    /// Copy-on-write node snapshot: readers clone the Arc once per operation,
    /// writers build a new Vec and swap it in.
    nodes: RwLock<Arc<Vec<Arc<EndpointNode>>>>,
    seq: AtomicU64,
    closed: AtomicBool,
    registration: Mutex<Option<(Arc<TransportRegistry>, u64)>>,
}

impl GroupTransport {
    /// Creates a transport for `name` over the given endpoint addresses.
    ///
    /// The strategy override and admission limit are set with
    /// [`set_strategy`](Self::set_strategy) and
    /// [`set_admission_limit`](Self::set_admission_limit) before the
    /// transport is shared.
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        connector: Arc<dyn Connector>,
        config: TransportConfig,
        client_addr: Option<SocketAddr>,
        addresses: Vec<SocketAddr>,
    ) -> Self {
        let transport = Self {
            name: name.into(),
            protocol,
            config,
            connector,
            client_addr,
            strategy: None,
            admission: None,
            nodes: RwLock::new(Arc::new(Vec::new())),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            registration: Mutex::new(None),
        };
        transport.update_topology(&addresses);
        transport
    }

    /// Installs a selection-strategy override. The strategy fully replaces
    /// the default selection and disposal policy.
    pub fn set_strategy(&mut self, strategy: Arc<dyn SelectionStrategy>) {
        self.strategy = Some(strategy);
    }

    /// Caps total outstanding connections at `limit`.
    pub fn set_admission_limit(&mut self, limit: usize) {
        self.admission = Some(AdmissionGate::new(limit));
    }

    pub(crate) fn set_registration(&self, registry: Arc<TransportRegistry>, id: u64) {
        *self
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some((registry, id));
    }

    /// Logical group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Local bind address excluded from the node set, if any.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// The admission gate, if a limit is configured.
    pub fn admission(&self) -> Option<&Arc<AdmissionGate>> {
        self.admission.as_ref()
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Arc<Vec<Arc<EndpointNode>>> {
        self.nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn new_node(&self, addr: SocketAddr) -> Arc<EndpointNode> {
        Arc::new(EndpointNode::new(self.config.pool_max_idle_per_node, addr))
    }

    /// Replaces the endpoint set. Nodes whose address survives are reused
    /// (idle pool, waiters, health, and attributes intact); new addresses get
    /// fresh nodes. Returns the previous address list. Connections held by
    /// removed nodes are not eagerly disposed.
    pub fn update_topology(&self, addresses: &[SocketAddr]) -> Vec<SocketAddr> {
        let mut guard = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let old = guard.clone();
        let previous: Vec<SocketAddr> = old.iter().map(|n| n.address()).collect();

        let mut desired: Vec<SocketAddr> = Vec::with_capacity(addresses.len());
        for &addr in addresses {
            if Some(addr) == self.client_addr || desired.contains(&addr) {
                continue;
            }
            desired.push(addr);
        }

        let same = desired.len() == old.len()
            && desired
                .iter()
                .all(|a| old.iter().any(|n| n.address() == *a));
        if same {
            return previous;
        }

        let mut next: Vec<Arc<EndpointNode>> = Vec::with_capacity(desired.len());
        for addr in desired {
            match old.iter().find(|n| n.address() == addr) {
                Some(existing) => next.push(existing.clone()),
                None => next.push(self.new_node(addr)),
            }
        }
        debug!(
            group = %self.name,
            endpoints = next.len(),
            "topology updated"
        );
        *guard = Arc::new(next);
        previous
    }

    /// Idempotent insert. Returns false when the address is already present
    /// or equals the client bind address.
    pub fn add_endpoint(&self, addr: SocketAddr) -> bool {
        if Some(addr) == self.client_addr {
            return false;
        }
        let mut guard = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        if guard.iter().any(|n| n.address() == addr) {
            return false;
        }
        let mut next = guard.as_ref().clone();
        next.push(self.new_node(addr));
        *guard = Arc::new(next);
        debug!(group = %self.name, addr = %addr, "endpoint added");
        true
    }

    /// Idempotent removal. In-flight connections to the removed address are
    /// not disposed here; the release path handles them once they return.
    pub fn remove_endpoint(&self, addr: SocketAddr) -> bool {
        let mut guard = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        if !guard.iter().any(|n| n.address() == addr) {
            return false;
        }
        let next: Vec<Arc<EndpointNode>> = guard
            .iter()
            .filter(|n| n.address() != addr)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        debug!(group = %self.name, addr = %addr, "endpoint removed");
        true
    }

    /// Current endpoint addresses, in node order.
    pub fn list_endpoints(&self) -> Vec<SocketAddr> {
        self.snapshot().iter().map(|n| n.address()).collect()
    }

    /// Finds the node managing `addr`, if any.
    pub fn find_node(&self, addr: SocketAddr) -> Option<Arc<EndpointNode>> {
        self.snapshot()
            .iter()
            .find(|n| n.address() == addr)
            .cloned()
    }

    /// Point-in-time counts across all nodes.
    pub fn stats(&self) -> TransportStats {
        let nodes = self.snapshot();
        let mut stats = TransportStats {
            endpoints: nodes.len(),
            ..Default::default()
        };
        for node in nodes.iter() {
            if node.is_enabled() {
                stats.healthy_endpoints += 1;
            }
            stats.idle_connections += node.idle_len();
            stats.pending_waiters += node.pending_waiters();
        }
        stats
    }

    /// Acquires a connection, optionally for a specific address.
    ///
    /// Never blocks the calling thread; parked acquisitions are awaited
    /// futures resolved by a release or failed on the waiter deadline.
    pub async fn acquire(&self, addr: Option<SocketAddr>) -> Result<Box<dyn Connection>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Some(strategy) = &self.strategy {
            return strategy.select(addr, self).await;
        }

        let nodes = self.snapshot();
        let mut target = addr;
        if target.is_none() && nodes.len() == 1 {
            target = Some(nodes[0].address());
        }

        if !self.protocol.is_tcp() {
            let udp_addr = match target {
                Some(a) => a,
                None => {
                    nodes
                        .first()
                        .ok_or_else(|| TransportError::NoEndpoints {
                            group: self.name.clone(),
                        })?
                        .address()
                }
            };
            return self
                .connector
                .create_udp(udp_addr, self.config.read_timeout, self.config.write_timeout)
                .await;
        }

        if let Some(a) = target {
            return match nodes.iter().find(|n| n.address() == a) {
                Some(node) => self.poll_node(node, false).await,
                // Outside the managed group: unpooled and ungated.
                None => {
                    self.connector
                        .create_tcp(a, self.config.read_timeout, self.config.write_timeout)
                        .await
                }
            };
        }

        if nodes.is_empty() {
            return Err(TransportError::NoEndpoints {
                group: self.name.clone(),
            });
        }

        let healthy: Vec<Arc<EndpointNode>> = nodes
            .iter()
            .filter(|n| n.is_enabled())
            .cloned()
            .collect();
        if !healthy.is_empty() {
            let pick = (self.seq.fetch_add(1, Ordering::Relaxed) % healthy.len() as u64) as usize;
            return self.poll_node(&healthy[pick], true).await;
        }

        self.connect_any(&nodes).await
    }

    /// Admission-controlled acquisition from one node: idle pool first, then
    /// a gated connect. Exposed for strategy implementations.
    pub async fn acquire_from(&self, node: &Arc<EndpointNode>) -> Result<Box<dyn Connection>> {
        self.poll_node(node, false).await
    }

    async fn poll_node(
        &self,
        node: &Arc<EndpointNode>,
        track_health: bool,
    ) -> Result<Box<dyn Connection>> {
        loop {
            match node.pop_idle() {
                Some(conn) if conn.is_open() => return Ok(conn),
                Some(conn) => conn.dispose().await,
                None => break,
            }
        }

        let Some(gate) = &self.admission else {
            return self.connect_node(node, track_health).await;
        };

        if !gate.try_acquire() {
            let (tx, rx) = oneshot::channel();
            let Some(waiter_id) = node.enqueue_waiter(tx) else {
                return Err(TransportError::AdmissionQueueFull {
                    addr: node.address(),
                });
            };
            return match tokio::time::timeout(WAITER_TIMEOUT, rx).await {
                Ok(Ok(conn)) => Ok(conn),
                // Timed out, or the sender was dropped without resolving us.
                Ok(Err(_)) | Err(_) => {
                    node.remove_waiter(waiter_id);
                    Err(TransportError::AdmissionTimeout {
                        addr: node.address(),
                        timeout_ms: WAITER_TIMEOUT.as_millis() as u64,
                    })
                }
            };
        }

        match self.connect_node(node, track_health).await {
            Ok(conn) => {
                let gate = gate.clone();
                conn.on_before_close(Box::new(move || gate.release()));
                Ok(conn)
            }
            Err(e) => {
                // The permit was never consumed by a live connection.
                gate.release();
                Err(e)
            }
        }
    }

    async fn connect_node(
        &self,
        node: &Arc<EndpointNode>,
        track_health: bool,
    ) -> Result<Box<dyn Connection>> {
        match self
            .connector
            .create_tcp(
                node.address(),
                self.config.read_timeout,
                self.config.write_timeout,
            )
            .await
        {
            Ok(conn) => {
                if track_health {
                    node.clear_disabled();
                }
                Ok(conn)
            }
            Err(e) => {
                if track_health {
                    node.mark_disabled();
                    warn!(
                        group = %self.name,
                        addr = %node.address(),
                        error = %e,
                        "endpoint disabled after connect failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Total-outage fallback: race a connect attempt against every node.
    /// First success wins; later successes are pooled on their own node for
    /// reuse. Each attempt updates its node's health independently.
    async fn connect_any(
        &self,
        nodes: &Arc<Vec<Arc<EndpointNode>>>,
    ) -> Result<Box<dyn Connection>> {
        debug!(group = %self.name, "no healthy endpoint, racing all nodes");
        let (tx, rx) = oneshot::channel::<Box<dyn Connection>>();
        let winner = Arc::new(Mutex::new(Some(tx)));

        for node in nodes.iter() {
            let node = node.clone();
            let winner = winner.clone();
            let connector = self.connector.clone();
            let read_timeout = self.config.read_timeout;
            let write_timeout = self.config.write_timeout;
            tokio::spawn(async move {
                match connector
                    .create_tcp(node.address(), read_timeout, write_timeout)
                    .await
                {
                    Ok(conn) => {
                        node.clear_disabled();
                        let slot = winner.lock().unwrap_or_else(|e| e.into_inner()).take();
                        let leftover = match slot {
                            Some(tx) => tx.send(conn).err(),
                            None => Some(conn),
                        };
                        if let Some(conn) = leftover {
                            if let Some(rejected) = node.offer_idle(conn) {
                                rejected.dispose().await;
                            }
                        }
                    }
                    Err(err) => {
                        node.mark_disabled();
                        warn!(
                            addr = %node.address(),
                            error = %err,
                            "failover connect attempt failed"
                        );
                    }
                }
            });
        }
        drop(winner);

        rx.await.map_err(|_| TransportError::AllEndpointsUnavailable {
            group: self.name.clone(),
        })
    }

    /// Returns a connection to the transport.
    ///
    /// Unless force-closed, still open, and TCP, the connection is first
    /// offered to the oldest live waiter on its node, then to the node's idle
    /// pool. Everything else is disposed, which runs the connection's close
    /// hooks (and thereby gives back its admission permit).
    pub async fn release(&self, force_close: bool, conn: Box<dyn Connection>) {
        let conn = match &self.strategy {
            Some(strategy) => match strategy.return_connection(force_close, conn) {
                None => return,
                Some(back) => back,
            },
            None => conn,
        };

        if !force_close && self.protocol.is_tcp() && conn.is_open() && !self.is_closed() {
            match self.find_node(conn.remote_addr()) {
                Some(node) => {
                    if let Some(conn) = node.resolve_waiter(conn) {
                        if let Some(rejected) = node.offer_idle(conn) {
                            rejected.dispose().await;
                        }
                    }
                }
                None => conn.dispose().await,
            }
            return;
        }

        let node = self.find_node(conn.remote_addr());
        conn.dispose().await;
        if let Some(node) = node {
            // The dispose above may have freed an admission permit; give a
            // parked waiter a fresh connection if one fits under the gate.
            self.spawn_waiter_refill(node);
        }
    }

    fn spawn_waiter_refill(&self, node: Arc<EndpointNode>) {
        if self.is_closed() || !self.protocol.is_tcp() || node.pending_waiters() == 0 {
            return;
        }
        let connector = self.connector.clone();
        let gate = self.admission.clone();
        let read_timeout = self.config.read_timeout;
        let write_timeout = self.config.write_timeout;
        tokio::spawn(async move {
            if let Some(gate) = &gate {
                if !gate.try_acquire() {
                    return;
                }
            }
            match connector
                .create_tcp(node.address(), read_timeout, write_timeout)
                .await
            {
                Ok(conn) => {
                    if let Some(gate) = &gate {
                        let gate = gate.clone();
                        conn.on_before_close(Box::new(move || gate.release()));
                    }
                    if let Some(conn) = node.resolve_waiter(conn) {
                        // Waiter vanished in the meantime; keep the socket.
                        if let Some(rejected) = node.offer_idle(conn) {
                            rejected.dispose().await;
                        }
                    }
                }
                Err(err) => {
                    if let Some(gate) = &gate {
                        gate.release();
                    }
                    warn!(
                        addr = %node.address(),
                        error = %err,
                        "waiter refill connect failed"
                    );
                }
            }
        });
    }

    /// One-shot request helper: acquire, write `buf`, read one reply, invoke
    /// `on_complete`, and return the connection. Any I/O failure force-closes
    /// the connection instead of pooling it. `on_complete` runs on the
    /// completion task and must not block.
    pub fn send_receive<F>(self: &Arc<Self>, addr: Option<SocketAddr>, buf: Bytes, on_complete: F)
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        let transport = self.clone();
        tokio::spawn(async move {
            let conn = match transport.acquire(addr).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(group = %transport.name, error = %e, "send_receive acquire failed");
                    on_complete(Err(e));
                    return;
                }
            };
            if let Err(e) = conn.write(&buf).await {
                transport.release(true, conn).await;
                on_complete(Err(e));
                return;
            }
            match conn.read().await {
                Ok(reply) => {
                    on_complete(Ok(reply));
                    transport.release(false, conn).await;
                }
                Err(e) => {
                    transport.release(true, conn).await;
                    on_complete(Err(e));
                }
            }
        });
    }

    /// Disposes every node's idle connections and unregisters the transport.
    /// Safe to call more than once. Outstanding waiters are not failed here;
    /// they resolve through their own deadline.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let nodes = self.snapshot();
        for node in nodes.iter() {
            node.dispose_idle().await;
        }
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some((registry, id)) = registration {
            registry.unregister(id);
        }
        debug!(group = %self.name, "transport closed");
    }
}

impl std::fmt::Debug for GroupTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupTransport")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("client_addr", &self.client_addr)
            .field("endpoints", &self.list_endpoints())
            .finish()
    }
}

//! Factory layer: shared engine, shared configuration, and the liveness
//! registry of every transport it has created.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::connection::Connector;
use crate::engine::{EngineConfig, TokioEngine};
use crate::registry::TransportRegistry;
use crate::strategy::SelectionStrategy;
use crate::transport::{GroupTransport, Protocol, TransportConfig};

/// Optional per-transport settings passed at creation time.
#[derive(Default)]
pub struct TransportOptions {
    /// Selection-strategy override.
    pub strategy: Option<Arc<dyn SelectionStrategy>>,
    /// Cap on total outstanding connections; `None` = unbounded.
    pub admission_limit: Option<usize>,
    /// Local bind address excluded from the node set.
    pub client_addr: Option<SocketAddr>,
}

/// Creates transports over a shared connector and tracks them for cleanup.
pub struct TransportFactory {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<TransportRegistry>,
}

impl TransportFactory {
    /// Creates a factory over the given connector.
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            registry: TransportRegistry::new(),
        }
    }

    /// Creates a factory over the tokio engine.
    pub fn with_engine(config: TransportConfig) -> Self {
        Self::new(config, Arc::new(TokioEngine::new(EngineConfig::default())))
    }

    /// Shared transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The factory's liveness registry.
    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Creates and registers a transport for `name` over `addresses`.
    pub fn create_transport(
        &self,
        name: impl Into<String>,
        protocol: Protocol,
        addresses: Vec<SocketAddr>,
        options: TransportOptions,
    ) -> Arc<GroupTransport> {
        let mut transport = GroupTransport::new(
            name,
            protocol,
            self.connector.clone(),
            self.config.clone(),
            options.client_addr,
            addresses,
        );
        if let Some(strategy) = options.strategy {
            transport.set_strategy(strategy);
        }
        if let Some(limit) = options.admission_limit {
            transport.set_admission_limit(limit);
        }
        let transport = Arc::new(transport);
        let id = self.registry.register(&transport);
        transport.set_registration(self.registry.clone(), id);
        transport
    }

    /// Closes every live transport created by this factory.
    pub async fn close_all(&self) {
        for transport in self.registry.transports() {
            transport.close().await;
        }
    }
}

impl std::fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportFactory")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

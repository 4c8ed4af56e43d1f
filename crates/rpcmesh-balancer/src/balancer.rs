//! Load balancer process: registration listener, request router and health monitor
//! sharing one service registry

use rpcmesh_core::{BalancerConfig, RpcResult};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::health::HealthMonitor;
use crate::registration::{PortAllocator, RegistrationListener};
use crate::registry::ServiceRegistry;
use crate::router::RequestRouter;

/// Load balancer owning the service registry
pub struct LoadBalancer {
    config: BalancerConfig,
    registry: Arc<ServiceRegistry>,
    ports: Arc<PortAllocator>,
}

impl LoadBalancer {
    /// Create a new load balancer
    pub fn new(config: BalancerConfig) -> Self {
        let ports = Arc::new(PortAllocator::new(config.first_worker_port));
        Self {
            config,
            registry: Arc::new(ServiceRegistry::new()),
            ports,
        }
    }

    /// Shared handle to the service registry
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Bind the configured client and registration ports and serve on them
    pub async fn run(&self) -> RpcResult<()> {
        let client = TcpListener::bind(self.config.client.socket_addr()).await?;
        let registration = TcpListener::bind(self.config.registration.socket_addr()).await?;
        self.serve(client, registration).await
    }

    /// Serve on already-bound listeners until one of them fails
    pub async fn serve(&self, client: TcpListener, registration: TcpListener) -> RpcResult<()> {
        info!(
            client = %self.config.client.socket_addr(),
            registration = %self.config.registration.socket_addr(),
            first_worker_port = self.config.first_worker_port,
            max_retry = self.config.router.max_retry,
            "Starting load balancer"
        );

        let health = HealthMonitor::new(self.registry(), &self.config.health).spawn();
        let registrar = RegistrationListener::new(
            self.registry(),
            Arc::clone(&self.ports),
            self.config.advertise_host.clone(),
        );
        let router = RequestRouter::new(
            self.registry(),
            self.config.router.clone(),
            self.config.frame,
        );

        let result = tokio::select! {
            result = registrar.serve(registration) => result,
            result = router.serve(client) => result,
        };

        health.abort();
        result
    }
}

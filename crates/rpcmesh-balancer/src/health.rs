//! Health monitoring for registered workers

use async_trait::async_trait;
use futures::future::join_all;
use rpcmesh_core::HealthConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::ServiceRegistry;

/// Liveness check for a single worker address
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns true if the worker is alive
    async fn probe(&self, address: &str, timeout: Duration) -> bool;
}

/// Probe that only checks a TCP connection can be opened
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, address: &str, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            // Dropping the stream closes it without sending anything
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                warn!(address = %address, error = %e, "Health check failed");
                false
            }
            Err(_) => {
                warn!(
                    address = %address,
                    timeout_ms = timeout.as_millis() as u64,
                    "Health check timed out"
                );
                false
            }
        }
    }
}

/// Periodically probes every registry member and evicts the unreachable ones
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn Probe>,
    interval: Duration,
    timeout: Duration,
}

impl HealthMonitor {
    /// Create a health monitor that probes over TCP
    pub fn new(registry: Arc<ServiceRegistry>, config: &HealthConfig) -> Self {
        Self::with_probe(registry, config, Arc::new(TcpProbe))
    }

    /// Create a health monitor with a custom probe
    pub fn with_probe(
        registry: Arc<ServiceRegistry>,
        config: &HealthConfig,
        probe: Arc<dyn Probe>,
    ) -> Self {
        Self {
            registry,
            probe,
            interval: config.interval(),
            timeout: config.timeout(),
        }
    }

    /// Start the monitor as a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Probe on every tick, forever
    pub async fn run(self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Health monitor started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.check_all().await;
        }
    }

    /// Probe every current member once and evict failures. Returns the evicted addresses.
    pub async fn check_all(&self) -> Vec<String> {
        // The lock is only held for the snapshot, not while probing
        let members = self.registry.snapshot().await;
        if members.is_empty() {
            return Vec::new();
        }

        let probes = members.iter().map(|address| {
            let probe = Arc::clone(&self.probe);
            let timeout = self.timeout;
            async move { (address, probe.probe(address, timeout).await) }
        });
        let results = join_all(probes).await;

        let mut evicted = Vec::new();
        for (address, alive) in results {
            if alive {
                debug!(address = %address, "Health check passed");
                continue;
            }
            if self.registry.remove(address).await {
                evicted.push(address.clone());
            }
        }

        if !evicted.is_empty() {
            // Snapshot first: the macro's temporaries are not Send across an await
            let remaining = self.registry.snapshot().await;
            info!(
                evicted = ?evicted,
                remaining = ?remaining,
                "Evicted unreachable workers"
            );
        }
        evicted
    }

    /// Get the probe timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

//! rpcmesh daemon
//!
//! Runs the load balancer: registration listener, request router and health monitor.

use anyhow::Context;
use clap::Parser;
use rpcmesh_balancer::LoadBalancer;
use rpcmesh_core::BalancerConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// rpcmeshd - load balancer for self-registering rpcmesh workers
#[derive(Parser, Debug)]
#[command(name = "rpcmeshd")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind both listeners on
    #[arg(long)]
    address: Option<String>,

    /// Port clients connect to
    #[arg(long)]
    port: Option<u16>,

    /// Port workers register on
    #[arg(long)]
    registration_port: Option<u16>,

    /// First port assigned to a registering worker
    #[arg(long)]
    first_worker_port: Option<u16>,

    /// Host published for registered workers (defaults to the worker's peer IP)
    #[arg(long)]
    advertise_host: Option<String>,

    /// Retries after the first attempt when a worker answers with nothing
    #[arg(long)]
    max_retry: Option<u32>,

    /// Emit distinct status codes instead of the legacy set
    #[arg(long)]
    distinct_status_codes: bool,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<BalancerConfig> {
        let mut config = match &self.config {
            Some(path) => BalancerConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BalancerConfig::default(),
        };

        if let Some(address) = self.address {
            config.client.address = address.clone();
            config.registration.address = address;
        }
        if let Some(port) = self.port {
            config.client.port = port;
        }
        if let Some(port) = self.registration_port {
            config.registration.port = port;
        }
        if let Some(port) = self.first_worker_port {
            config.first_worker_port = port;
        }
        if self.advertise_host.is_some() {
            config.advertise_host = self.advertise_host;
        }
        if let Some(max_retry) = self.max_retry {
            config.router.max_retry = max_retry;
        }
        if self.distinct_status_codes {
            config.frame.legacy_status_codes = false;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Starting rpcmeshd v{}", env!("CARGO_PKG_VERSION"));
    info!("Worker ports starting at {}", config.first_worker_port);

    let balancer = LoadBalancer::new(config);
    balancer.run().await.context("load balancer stopped")?;
    Ok(())
}

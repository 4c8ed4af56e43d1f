//! rpcmesh CLI
//!
//! Command-line interface for calling operations and running a demo worker.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// rpcmesh - RPC over a self-registering worker pool
#[derive(Parser, Debug)]
#[command(name = "rpcmesh")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (overrides --verbose and the worker configuration)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Call an operation through the load balancer
    Call {
        /// Operation name (e.g., echoUpper)
        operation: String,

        /// JSON request payload
        #[arg(default_value = "{}")]
        payload: String,

        /// Load balancer client address
        #[arg(long, default_value = "127.0.0.1:4000")]
        balancer: String,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run a worker serving the demo operations
    Worker {
        /// TOML worker configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load balancer registration address
        #[arg(long)]
        balancer: Option<String>,

        /// Address to bind the assigned port on
        #[arg(long)]
        bind_address: Option<String>,

        /// Serve on this port directly instead of registering
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    // RUST_LOG wins over the flags
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose.then(|| "debug".to_string());
    let log_level = cli.log_level.or(verbose);

    match cli.command {
        Commands::Call {
            operation,
            payload,
            balancer,
            timeout_ms,
        } => {
            init_logging(log_level.as_deref().unwrap_or("warn"))?;
            commands::call(&balancer, &operation, &payload, timeout_ms).await?;
        }
        Commands::Worker {
            config,
            balancer,
            bind_address,
            port,
        } => {
            let worker_config = commands::worker_config(config, balancer, bind_address)?;
            init_logging(log_level.as_deref().unwrap_or(worker_config.logging.level.as_str()))?;
            commands::worker(worker_config, port).await?;
        }
    }

    Ok(())
}

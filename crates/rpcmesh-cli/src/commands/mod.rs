//! CLI commands implementation

use anyhow::{Context, Result};
use rpcmesh_client::RpcClient;
use rpcmesh_core::WorkerConfig;
use rpcmesh_worker::{HandlerRegistry, WorkerNode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Request and response of the demo `echoUpper` operation
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Text {
    pub text: String,
}

/// Call an operation and print the JSON response
pub async fn call(
    balancer: &str,
    operation: &str,
    payload: &str,
    timeout_ms: Option<u64>,
) -> Result<()> {
    // Validate locally so a typo doesn't travel to a worker
    let request: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;

    let mut client = RpcClient::new(balancer);
    if let Some(ms) = timeout_ms {
        client = client.with_timeout(Duration::from_millis(ms));
    }

    let response: serde_json::Value = client
        .call(operation, &request)
        .await
        .with_context(|| format!("call to '{}' via {} failed", operation, balancer))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Handlers served by the demo worker
pub fn demo_handlers() -> Result<HandlerRegistry> {
    let mut handlers = HandlerRegistry::new();
    handlers.register("echoUpper", |req: &Text, res: &mut Text| {
        res.text = req.text.to_uppercase();
        Ok(())
    })?;
    Ok(handlers)
}

/// Load the worker configuration and apply command-line overrides
pub fn worker_config(
    config: Option<PathBuf>,
    balancer: Option<String>,
    bind_address: Option<String>,
) -> Result<WorkerConfig> {
    let mut worker_config = match config {
        Some(path) => WorkerConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(balancer) = balancer {
        worker_config.balancer_address = balancer;
    }
    if let Some(bind_address) = bind_address {
        worker_config.bind_address = bind_address;
    }
    Ok(worker_config)
}

/// Run the demo worker until it fails
pub async fn worker(config: WorkerConfig, port: Option<u16>) -> Result<()> {
    let node = WorkerNode::new(demo_handlers()?, config);
    match port {
        Some(port) => node.listen(port).await?,
        None => node.run().await?,
    }
    Ok(())
}

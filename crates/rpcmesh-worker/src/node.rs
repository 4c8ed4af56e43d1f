//! Worker node: one request per connection, dispatched through the handler registry

use rpcmesh_core::frame::{self, read_request};
use rpcmesh_core::{
    Frame, FrameConfig, RpcError, RpcResult, StatusCode, WorkerConfig, REGISTER_SERVER,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::handler::HandlerRegistry;
use crate::registration::Registrar;

/// Serves calls for the operations in its handler registry
#[derive(Clone)]
pub struct WorkerNode {
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
}

impl WorkerNode {
    /// Create a worker; the registry is frozen from here on
    pub fn new(registry: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Register with the load balancer, then serve on the assigned port
    pub async fn run(&self) -> RpcResult<()> {
        let mut registrar = Registrar::new(&self.config);
        let port = registrar.register().await?;

        let listener = self.bind(port).await?;
        registrar.mark_serving();
        self.serve(listener).await
    }

    /// Bind `port` and serve on it
    pub async fn listen(&self, port: u16) -> RpcResult<()> {
        let listener = self.bind(port).await?;
        self.serve(listener).await
    }

    async fn bind(&self, port: u16) -> RpcResult<TcpListener> {
        let addr = format!("{}:{}", self.config.bind_address, port);
        let listener = TcpListener::bind(&addr).await?;
        info!(address = %addr, "Worker listening");
        Ok(listener)
    }

    /// Accept connections forever, one task per connection
    pub async fn serve(&self, listener: TcpListener) -> RpcResult<()> {
        for op in self.registry.operations() {
            info!(
                operation = %op.name,
                request = op.request_shape,
                response = op.response_shape,
                "Serving operation"
            );
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let registry = Arc::clone(&self.registry);
            let frame_config = self.config.frame;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(&registry, frame_config, stream, peer).await {
                    warn!(peer = %peer, error = %e, "Dropped request");
                }
            });
        }
    }
}

async fn handle_connection(
    registry: &HandlerRegistry,
    frame_config: FrameConfig,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> RpcResult<()> {
    let raw = read_request(&mut stream, frame_config.max_frame_size).await?;
    if raw.is_empty() {
        debug!(peer = %peer, "Liveness probe");
        return Ok(());
    }

    let request = frame::decode_request(&raw)?;
    if let Some(reply) = respond(registry, &request, frame_config) {
        stream.write_all(&reply).await?;
        stream.shutdown().await?;
    }
    Ok(())
}

/// Build the reply for one request, or `None` when nothing should be sent
pub fn respond(
    registry: &HandlerRegistry,
    request: &Frame,
    frame_config: FrameConfig,
) -> Option<Vec<u8>> {
    let legacy = frame_config.legacy_status_codes;
    if request.is_probe() {
        debug!("Health check frame");
        return None;
    }

    if request.name == REGISTER_SERVER {
        warn!("Registration frame received on the request port; load balancer is misconfigured");
        return None;
    }

    debug!(operation = %request.name, "Dispatching");
    match registry.dispatch(&request.name, &request.payload) {
        Ok(body) => {
            let reply = frame::encode_response(StatusCode::Success, &body);
            if reply.len() > frame_config.max_frame_size {
                warn!(
                    operation = %request.name,
                    size = reply.len(),
                    limit = frame_config.max_frame_size,
                    "Response exceeds the frame bound"
                );
                return frame::encode_status(StatusCode::HandlerFailed, legacy);
            }
            Some(reply)
        }
        Err(RpcError::Decode(msg)) => {
            warn!(operation = %request.name, error = %msg, "Failed to decode request");
            frame::encode_status(StatusCode::DecodeFailed, legacy)
        }
        Err(RpcError::UnknownOperation(name)) => {
            warn!(operation = %name, "Unknown operation");
            frame::encode_status(StatusCode::UnknownOperation, legacy)
        }
        Err(e) => {
            warn!(operation = %request.name, error = %e, "Handler failed");
            frame::encode_status(StatusCode::HandlerFailed, legacy)
        }
    }
}

//! RPC client
//!
//! Opens a fresh connection to the load balancer for every call, writes one request
//! frame and reads the response until the load balancer closes the connection.

use rpcmesh_core::frame::{self, read_to_close, DEFAULT_MAX_FRAME_SIZE};
use rpcmesh_core::{Frame, RpcError, RpcResult};
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Client for calling operations through a load balancer
#[derive(Debug, Clone)]
pub struct RpcClient {
    address: String,
    max_frame_size: usize,
    timeout: Option<Duration>,
}

impl RpcClient {
    /// Create a client for the load balancer at `address` (`host:port`)
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            timeout: None,
        }
    }

    /// Largest response accepted
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Bound the whole call (connect, write, read)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Call `operation` with a JSON-encoded request and decode the JSON response
    pub async fn call<Req, Resp>(&self, operation: &str, request: &Req) -> RpcResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let body = self.call_raw(operation, &payload).await?;
        serde_json::from_slice(&body).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Call `operation` with an already-encoded payload and return the raw response payload
    pub async fn call_raw(&self, operation: &str, payload: &[u8]) -> RpcResult<Vec<u8>> {
        let request = frame::encode_request(&Frame::new(operation, payload))?;

        let raw = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(&request))
                .await
                .map_err(|_| {
                    RpcError::Transport(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("call to {} timed out", self.address),
                    ))
                })??,
            None => self.exchange(&request).await?,
        };

        let (status, body) = frame::decode_response(&raw)?;
        debug!(operation = %operation, status = %status, "Call completed");
        if !status.is_success() {
            return Err(status.into());
        }
        Ok(body.to_vec())
    }

    async fn exchange(&self, request: &[u8]) -> RpcResult<Vec<u8>> {
        let mut stream = TcpStream::connect(&self.address).await?;
        stream.write_all(request).await?;
        read_to_close(&mut stream, self.max_frame_size).await
    }
}

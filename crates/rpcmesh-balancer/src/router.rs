//! Request router: relays each client frame to a worker picked in round-robin order

use rpcmesh_core::frame::{self, read_request, read_to_close};
use rpcmesh_core::{FrameConfig, RouterConfig, RpcError, RpcResult, StatusCode};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::registry::ServiceRegistry;

/// Outcome of one forwarded request
enum Reply {
    Response(Vec<u8>),
    /// Worker closed without answering, or the transport failed
    Empty,
    /// Worker answered with more than `max_frame_size` bytes
    TooLarge,
}

/// Routes client requests across the service registry
#[derive(Clone)]
pub struct RequestRouter {
    registry: Arc<ServiceRegistry>,
    config: RouterConfig,
    frame: FrameConfig,
}

impl RequestRouter {
    pub fn new(registry: Arc<ServiceRegistry>, config: RouterConfig, frame: FrameConfig) -> Self {
        Self {
            registry,
            config,
            frame,
        }
    }

    /// Accept client connections forever, one task per connection
    pub async fn serve(&self, listener: TcpListener) -> RpcResult<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Request router listening");
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept client connection");
                    continue;
                }
            };

            let router = self.clone();
            tokio::spawn(async move {
                if let Err(e) = router.handle_client(stream, peer).await {
                    warn!(peer = %peer, error = %e, "Dropped client request");
                }
            });
        }
    }

    async fn handle_client(&self, mut stream: TcpStream, peer: SocketAddr) -> RpcResult<()> {
        let request = read_request(&mut stream, self.frame.max_frame_size).await?;
        if request.is_empty() {
            debug!(peer = %peer, "Liveness probe");
            return Ok(());
        }

        let response = self.route(&request).await;
        stream.write_all(&response).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Relay one raw request and return the bytes to send back to the client.
    ///
    /// Runs at most `max_retry + 1` attempts. Only an empty worker response is retried;
    /// an empty registry, a failed dial or an oversized response answers immediately.
    pub async fn route(&self, request: &[u8]) -> Vec<u8> {
        let attempts = self.config.max_retry.saturating_add(1);

        for attempt in 1..=attempts {
            let Some(address) = self.registry.next().await else {
                warn!("No servers available");
                return self.status(StatusCode::NoServersAvailable);
            };

            let mut worker = match self.dial(&address).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(address = %address, error = %e, "Failed to dial worker");
                    return self.status(StatusCode::DialFailed);
                }
            };

            debug!(address = %address, attempt = attempt, "Forwarding request");
            match self.exchange(&mut worker, request).await {
                Reply::Response(response) => return response,
                Reply::TooLarge => {
                    // The worker already ran the call, so it is not sent anywhere else
                    warn!(
                        address = %address,
                        limit = self.frame.max_frame_size,
                        "Worker response exceeds the frame bound"
                    );
                    return self.status(StatusCode::HandlerFailed);
                }
                Reply::Empty => {}
            }

            warn!(
                address = %address,
                attempt = attempt,
                max_attempts = attempts,
                "Worker returned an empty response"
            );
        }

        warn!(attempts = attempts, "Maximum retries exceeded");
        self.status(StatusCode::MaxRetriesExceeded)
    }

    async fn dial(&self, address: &str) -> RpcResult<TcpStream> {
        let stream = with_timeout(self.config.dial_timeout(), TcpStream::connect(address))
            .await
            .map_err(|_| RpcError::DialFailed(address.to_string()))?;
        Ok(stream?)
    }

    /// Write the request and read the worker's full response. Transport failures read as empty.
    async fn exchange(&self, worker: &mut TcpStream, request: &[u8]) -> Reply {
        if let Err(e) = worker.write_all(request).await {
            debug!(error = %e, "Failed to forward request");
            return Reply::Empty;
        }

        let read = read_to_close(worker, self.frame.max_frame_size);
        match with_timeout(self.config.read_timeout(), read).await {
            Ok(Ok(response)) if response.is_empty() => Reply::Empty,
            Ok(Ok(response)) => Reply::Response(response),
            Ok(Err(RpcError::FrameTooLarge { .. })) => Reply::TooLarge,
            Ok(Err(e)) => {
                debug!(error = %e, "Failed to read worker response");
                Reply::Empty
            }
            Err(_) => {
                debug!("Timed out waiting for worker response");
                Reply::Empty
            }
        }
    }

    fn status(&self, status: StatusCode) -> Vec<u8> {
        frame::encode_status(status, self.frame.legacy_status_codes)
            .unwrap_or_else(|| vec![StatusCode::HandlerFailed.as_u8()])
    }
}

/// Await `future`, bounded by `limit` when one is set
async fn with_timeout<F: Future>(
    limit: Option<Duration>,
    future: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await,
        None => Ok(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcmesh_core::frame::DEFAULT_MAX_FRAME_SIZE;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    const REQUEST: &[u8] = b"echoUpper\r\n\r\n{\"text\":\"hi\"}\r\n\r\n";

    fn create_router(registry: Arc<ServiceRegistry>, legacy: bool) -> RequestRouter {
        let frame = FrameConfig {
            legacy_status_codes: legacy,
            ..FrameConfig::default()
        };
        RequestRouter::new(registry, RouterConfig::default(), frame)
    }

    /// Worker that reads the request and closes without answering
    async fn spawn_silent_worker(attempts: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                attempts.fetch_add(1, Ordering::SeqCst);
                let _ = read_request(&mut stream, 1024).await;
            }
        });
        addr
    }

    /// Worker that counts requests and answers each with `reply`
    async fn spawn_counting_worker(reply: Vec<u8>, attempts: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                attempts.fetch_add(1, Ordering::SeqCst);
                let _ = read_request(&mut stream, 1024).await;
                let _ = stream.write_all(&reply).await;
            }
        });
        addr
    }

    /// Worker that echoes a fixed success response
    async fn spawn_answering_worker(reply: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let _ = read_request(&mut stream, 1024).await;
                stream.write_all(reply).await.unwrap();
            }
        });
        addr
    }

    async fn dead_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_empty_registry_returns_no_servers() {
        let router = create_router(Arc::new(ServiceRegistry::new()), true);
        assert_eq!(router.route(REQUEST).await, vec![4]);
    }

    #[tokio::test]
    async fn test_relays_worker_response_verbatim() {
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .add(spawn_answering_worker(b"\x00{\"text\":\"HI\"}").await)
            .await;

        let router = create_router(registry, true);
        assert_eq!(router.route(REQUEST).await, b"\x00{\"text\":\"HI\"}".to_vec());
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ServiceRegistry::new());
        registry.add(spawn_silent_worker(Arc::clone(&attempts)).await).await;
        registry.add(spawn_silent_worker(Arc::clone(&attempts)).await).await;

        let router = create_router(Arc::clone(&registry), true);
        assert_eq!(router.route(REQUEST).await, vec![6]);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);

        // Failed workers are not evicted by the router
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_retry_bound_distinct_code() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ServiceRegistry::new());
        registry.add(spawn_silent_worker(Arc::clone(&attempts)).await).await;

        let router = create_router(registry, false);
        assert_eq!(router.route(REQUEST).await, vec![8]);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_moves_to_next_worker() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ServiceRegistry::new());
        registry.add(spawn_silent_worker(Arc::clone(&attempts)).await).await;
        registry.add(spawn_answering_worker(b"\x00{}").await).await;

        let router = create_router(registry, true);
        assert_eq!(router.route(REQUEST).await, b"\x00{}".to_vec());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reply_at_frame_bound_relayed_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut reply = vec![b'x'; DEFAULT_MAX_FRAME_SIZE];
        reply[0] = 0;

        let registry = Arc::new(ServiceRegistry::new());
        registry
            .add(spawn_counting_worker(reply.clone(), Arc::clone(&attempts)).await)
            .await;
        registry
            .add(spawn_counting_worker(reply.clone(), Arc::clone(&attempts)).await)
            .await;

        let router = create_router(registry, true);
        assert_eq!(router.route(REQUEST).await, reply);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_reply_is_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut reply = vec![b'x'; DEFAULT_MAX_FRAME_SIZE + 1];
        reply[0] = 0;

        let registry = Arc::new(ServiceRegistry::new());
        registry
            .add(spawn_counting_worker(reply.clone(), Arc::clone(&attempts)).await)
            .await;
        registry
            .add(spawn_counting_worker(reply, Arc::clone(&attempts)).await)
            .await;

        let router = create_router(Arc::clone(&registry), true);
        assert_eq!(router.route(REQUEST).await, vec![6]);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dial_failure_is_not_retried() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.add(dead_address().await).await;
        registry.add(spawn_answering_worker(b"\x00{}").await).await;

        let router = create_router(registry, true);
        assert_eq!(router.route(REQUEST).await, vec![5]);
    }

    #[tokio::test]
    async fn test_serve_end_to_end() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.add(spawn_answering_worker(b"\x00{\"ok\":true}").await).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(registry, true);
        tokio::spawn(async move { router.serve(listener).await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(REQUEST).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"\x00{\"ok\":true}".to_vec());
    }
}

//! Load balancer side of the registration handshake

use rpcmesh_core::frame::{self, Frame};
use rpcmesh_core::{RpcError, RpcResult, REGISTER_SERVER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::registry::ServiceRegistry;

/// Hands out worker ports in increasing order
///
/// Ports are never reclaimed, so a worker that is evicted and re-registers gets a new one.
pub struct PortAllocator {
    next: Mutex<Option<u16>>,
}

impl PortAllocator {
    pub fn new(first_port: u16) -> Self {
        Self {
            next: Mutex::new(Some(first_port)),
        }
    }

    /// Take the next port
    pub async fn allocate(&self) -> RpcResult<u16> {
        let mut next = self.next.lock().await;
        let port = next.ok_or(RpcError::PortsExhausted)?;
        *next = port.checked_add(1);
        Ok(port)
    }

    /// Port the next registration will receive, if any remain
    pub async fn peek(&self) -> Option<u16> {
        *self.next.lock().await
    }
}

/// Accepts worker registrations and publishes them into the service registry
#[derive(Clone)]
pub struct RegistrationListener {
    registry: Arc<ServiceRegistry>,
    ports: Arc<PortAllocator>,
    advertise_host: Option<String>,
}

impl RegistrationListener {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        ports: Arc<PortAllocator>,
        advertise_host: Option<String>,
    ) -> Self {
        Self {
            registry,
            ports,
            advertise_host,
        }
    }

    /// Accept registrations forever, one task per connection
    pub async fn serve(&self, listener: TcpListener) -> RpcResult<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Registration listener started");
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept registration");
                    continue;
                }
            };

            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.register(stream, peer).await {
                    warn!(peer = %peer, error = %e, "Registration failed");
                }
            });
        }
    }

    /// Assign a port to the connecting worker and add it to the registry.
    ///
    /// Nothing is read from the worker. The member is only added if the assignment was
    /// written successfully.
    pub async fn register(&self, mut stream: TcpStream, peer: SocketAddr) -> RpcResult<String> {
        let port = self.ports.allocate().await?;
        let assignment = frame::encode_request(&Frame::new(REGISTER_SERVER, port.to_string()))?;

        stream.write_all(&assignment).await?;
        stream.shutdown().await?;
        debug!(peer = %peer, port = port, "Sent port assignment");

        let host = self
            .advertise_host
            .clone()
            .unwrap_or_else(|| peer.ip().to_string());
        let address = format_address(&host, port);
        if !self.registry.add(address.clone()).await {
            warn!(peer = %peer, address = %address, "Worker address is already registered");
            return Err(RpcError::RegistrationFailed(format!(
                "{} is already registered",
                address
            )));
        }
        info!(peer = %peer, address = %address, "Worker registered");
        Ok(address)
    }
}

fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcmesh_core::frame::read_to_close;

    #[tokio::test]
    async fn test_ports_increase_from_first() {
        let ports = PortAllocator::new(4001);
        assert_eq!(ports.allocate().await.unwrap(), 4001);
        assert_eq!(ports.allocate().await.unwrap(), 4002);
        assert_eq!(ports.peek().await, Some(4003));
    }

    #[tokio::test]
    async fn test_port_exhaustion() {
        let ports = PortAllocator::new(u16::MAX);
        assert_eq!(ports.allocate().await.unwrap(), u16::MAX);
        assert!(matches!(
            ports.allocate().await.unwrap_err(),
            RpcError::PortsExhausted
        ));
    }

    #[test]
    fn test_format_address() {
        assert_eq!(format_address("127.0.0.1", 4001), "127.0.0.1:4001");
        assert_eq!(format_address("::1", 4001), "[::1]:4001");
        assert_eq!(format_address("localhost", 4001), "localhost:4001");
    }

    #[tokio::test]
    async fn test_registration_handshake() {
        let registry = Arc::new(ServiceRegistry::new());
        let ports = Arc::new(PortAllocator::new(4001));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let registration = RegistrationListener::new(Arc::clone(&registry), ports, None);
        tokio::spawn(async move { registration.serve(listener).await });

        for expected in [4001u16, 4002] {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let raw = read_to_close(&mut stream, 1024).await.unwrap();
            let assignment = frame::decode_request(&raw).unwrap();
            assert_eq!(assignment.name, REGISTER_SERVER);
            assert_eq!(assignment.payload, expected.to_string().into_bytes());
        }

        // The member is added right after the write, give the task a moment
        for _ in 0..50 {
            if registry.len().await == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let mut members = registry.snapshot().await;
        members.sort();
        assert_eq!(
            members,
            vec!["127.0.0.1:4001".to_string(), "127.0.0.1:4002".to_string()]
        );
    }

    #[tokio::test]
    async fn test_advertise_host_override() {
        let registry = Arc::new(ServiceRegistry::new());
        let ports = Arc::new(PortAllocator::new(5001));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let registration = RegistrationListener::new(
            Arc::clone(&registry),
            ports,
            Some("worker.internal".to_string()),
        );

        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let _client = client.unwrap();
        let (stream, peer) = accepted.unwrap();

        let address = registration.register(stream, peer).await.unwrap();
        assert_eq!(address, "worker.internal:5001");
        assert!(registry.contains("worker.internal:5001").await);
    }

    #[tokio::test]
    async fn test_duplicate_address_reported() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.add("worker.internal:5001").await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registration = RegistrationListener::new(
            Arc::clone(&registry),
            Arc::new(PortAllocator::new(5001)),
            Some("worker.internal".to_string()),
        );

        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let _client = client.unwrap();
        let (stream, peer) = accepted.unwrap();

        let err = registration.register(stream, peer).await.unwrap_err();
        assert!(matches!(err, RpcError::RegistrationFailed(_)));
        assert_eq!(registry.len().await, 1);
    }
}

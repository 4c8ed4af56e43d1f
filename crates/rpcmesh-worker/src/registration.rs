//! Worker side of the registration handshake
//!
//! The worker connects to the load balancer's registration listener and waits for a
//! `register-server` frame carrying its port. Failed attempts are retried against the same
//! endpoint with exponential backoff.

use rpcmesh_core::frame::{self, read_to_close};
use rpcmesh_core::{BackoffConfig, RpcError, RpcResult, WorkerConfig, REGISTER_SERVER};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Where a worker is in the registration handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    AwaitingAssignment,
    Assigned(u16),
    Serving(u16),
}

/// Drives one worker through registration
pub struct Registrar {
    balancer_address: String,
    backoff: BackoffConfig,
    max_frame_size: usize,
    state: RegistrationState,
}

impl Registrar {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            balancer_address: config.balancer_address.clone(),
            backoff: config.registration.clone(),
            max_frame_size: config.frame.max_frame_size,
            state: RegistrationState::Unregistered,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Register with the load balancer and return the assigned port.
    ///
    /// Retries until an assignment arrives, or until `max_attempts` is reached if set.
    pub async fn register(&mut self) -> RpcResult<u16> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.state = RegistrationState::Unregistered;

            match self.try_register().await {
                Ok(port) => {
                    self.state = RegistrationState::Assigned(port);
                    info!(
                        balancer = %self.balancer_address,
                        port = port,
                        attempt = attempt,
                        "Received port assignment"
                    );
                    return Ok(port);
                }
                Err(e) => {
                    if let Some(max) = self.backoff.max_attempts {
                        if attempt >= max {
                            return Err(RpcError::RegistrationFailed(format!(
                                "gave up after {} attempts: {}",
                                attempt, e
                            )));
                        }
                    }

                    let delay = self.backoff.delay(attempt);
                    warn!(
                        balancer = %self.balancer_address,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Registration attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Record that the assigned port is now being served
    pub fn mark_serving(&mut self) {
        if let RegistrationState::Assigned(port) = self.state {
            self.state = RegistrationState::Serving(port);
        }
    }

    async fn try_register(&mut self) -> RpcResult<u16> {
        let mut stream = TcpStream::connect(&self.balancer_address).await?;
        self.state = RegistrationState::AwaitingAssignment;
        debug!(balancer = %self.balancer_address, "Awaiting port assignment");

        let raw = read_to_close(&mut stream, self.max_frame_size).await?;
        parse_assignment(&raw)
    }
}

/// Extract the port from a registration frame
pub fn parse_assignment(raw: &[u8]) -> RpcResult<u16> {
    if raw.is_empty() {
        return Err(RpcError::EmptyResponse);
    }

    let assignment = frame::decode_request(raw)?;
    if assignment.is_probe() {
        return Err(RpcError::RegistrationFailed(
            "received a probe instead of a port assignment".to_string(),
        ));
    }
    if assignment.name != REGISTER_SERVER {
        return Err(RpcError::RegistrationFailed(format!(
            "unexpected frame '{}'",
            assignment.name
        )));
    }

    let text = std::str::from_utf8(&assignment.payload)
        .map_err(|e| RpcError::RegistrationFailed(format!("port is not UTF-8: {}", e)))?;
    text.trim()
        .parse::<u16>()
        .map_err(|e| RpcError::RegistrationFailed(format!("invalid port '{}': {}", text, e)))
}

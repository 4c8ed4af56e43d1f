//! Error types for rpcmesh

use crate::status::StatusCode;
use thiserror::Error;

/// Main error type for rpcmesh
#[derive(Error, Debug)]
pub enum RpcError {
    /// Connection-level failure (connect, read, write)
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Frame could not be parsed
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame exceeded the configured read bound
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// No handler registered under the requested name
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Request payload did not match the handler's request shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Handler returned an error or panicked
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    /// Service registry is empty
    #[error("No servers available")]
    NoServersAvailable,

    /// Selected worker could not be dialed
    #[error("Failed to dial worker {0}")]
    DialFailed(String),

    /// Every retry against the pool came back empty
    #[error("Maximum retries exceeded")]
    MaxRetriesExceeded,

    /// Peer closed without sending a single byte
    #[error("Empty response")]
    EmptyResponse,

    /// Remote side answered with a non-zero status byte
    #[error("Call failed with status {code} ({status})", code = .status.as_u8())]
    Status { status: StatusCode },

    /// Worker could not obtain a port assignment
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// Port allocator ran past the u16 range
    #[error("Worker port space exhausted")]
    PortsExhausted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for rpcmesh operations
pub type RpcResult<T> = Result<T, RpcError>;

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RpcError {
    fn from(err: toml::de::Error) -> Self {
        RpcError::Config(err.to_string())
    }
}

impl From<StatusCode> for RpcError {
    fn from(status: StatusCode) -> Self {
        RpcError::Status { status }
    }
}

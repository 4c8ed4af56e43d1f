//! Configuration types for rpcmesh

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::frame::DEFAULT_MAX_FRAME_SIZE;

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, crate::RpcError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| crate::RpcError::Config(format!("Failed to read config file: {}", e)))?;
    toml::from_str(&content)
        .map_err(|e| crate::RpcError::Config(format!("Failed to parse config: {}", e)))
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Client-facing listener
    pub client: ListenConfig,
    /// Listener workers register against
    pub registration: ListenConfig,
    /// First port handed out to a registering worker
    pub first_worker_port: u16,
    /// Host published for registered workers; peer IP of the registration connection if unset
    pub advertise_host: Option<String>,
    /// Health monitor configuration
    pub health: HealthConfig,
    /// Request router configuration
    pub router: RouterConfig,
    /// Framing configuration
    pub frame: FrameConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            client: ListenConfig::new(4000),
            registration: ListenConfig::new(3333),
            first_worker_port: 4001,
            advertise_host: None,
            health: HealthConfig::default(),
            router: RouterConfig::default(),
            frame: FrameConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BalancerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, crate::RpcError> {
        load_toml(path)
    }
}

/// Address and port for a listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub address: String,
    pub port: u16,
}

impl ListenConfig {
    pub fn new(port: u16) -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Probe tick interval in milliseconds
    pub interval_ms: u64,
    /// Per-probe connect timeout in milliseconds
    pub timeout_ms: u64,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            timeout_ms: 1000,
        }
    }
}

/// Request router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Retries after the first attempt when a worker answers with nothing
    pub max_retry: u32,
    /// Worker dial timeout in milliseconds, unbounded if unset
    pub dial_timeout_ms: Option<u64>,
    /// Worker response timeout in milliseconds, unbounded if unset
    pub read_timeout_ms: Option<u64>,
}

impl RouterConfig {
    pub fn dial_timeout(&self) -> Option<Duration> {
        self.dial_timeout_ms.map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            dial_timeout_ms: Some(5000),
            read_timeout_ms: Some(5000),
        }
    }
}

/// Framing configuration shared by every node
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Largest request or response accepted, in bytes
    pub max_frame_size: usize,
    /// Emit only the reference status bytes (0, 4, 5, 6)
    pub legacy_status_codes: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            legacy_status_codes: true,
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Registration endpoint of the load balancer
    pub balancer_address: String,
    /// Address the worker binds its assigned port on
    pub bind_address: String,
    /// Registration retry policy
    pub registration: BackoffConfig,
    /// Framing configuration
    pub frame: FrameConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl WorkerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, crate::RpcError> {
        load_toml(path)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            balancer_address: "127.0.0.1:3333".to_string(),
            bind_address: "0.0.0.0".to_string(),
            registration: BackoffConfig::default(),
            frame: FrameConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Exponential backoff for registration attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Give up after this many attempts; retry forever if unset
    pub max_attempts: Option<u32>,
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            max_attempts: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

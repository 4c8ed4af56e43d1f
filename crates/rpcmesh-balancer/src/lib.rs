//! rpcmesh-balancer: Load balancer for rpcmesh
//!
//! This crate provides the load balancer side of rpcmesh:
//! - Round-robin service registry of live workers
//! - Registration listener and port allocation
//! - Health monitoring with eviction
//! - Request routing with bounded retry

pub mod balancer;
pub mod health;
pub mod registration;
pub mod registry;
pub mod router;

pub use balancer::LoadBalancer;
pub use health::{HealthMonitor, Probe, TcpProbe};
pub use registration::{PortAllocator, RegistrationListener};
pub use registry::ServiceRegistry;
pub use router::RequestRouter;

//! rpcmesh-worker: Worker side of rpcmesh
//!
//! This crate provides:
//! - A registry of typed handlers dispatched by operation name
//! - The worker node serving one request per connection
//! - Self-registration with the load balancer

pub mod handler;
pub mod node;
pub mod registration;

pub use handler::{HandlerError, HandlerRegistry, HandlerResult, OperationInfo};
pub use node::WorkerNode;
pub use registration::{Registrar, RegistrationState};

//! rpcmesh-core: Shared protocol types for rpcmesh
//!
//! This crate provides what every rpcmesh node agrees on:
//! - Request/response framing over a byte stream
//! - Response status codes
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod frame;
pub mod status;

pub use config::*;
pub use error::*;
pub use frame::{Frame, DELIMITER, HEALTH_CHECK, REGISTER_SERVER};
pub use status::StatusCode;

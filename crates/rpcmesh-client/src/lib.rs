//! rpcmesh-client: Client for rpcmesh
//!
//! Calls named operations through the load balancer, one connection per call.

pub mod client;

pub use client::RpcClient;

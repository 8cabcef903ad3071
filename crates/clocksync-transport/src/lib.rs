//! clocksync Transport Layer - UDP request/response
//!
//! This crate provides:
//! - UDP transport
//! - Request/response endpoint with per-call timeouts
//! - Network proxies for remote nodes and the coordinator

pub mod remote;
pub mod rpc;
pub mod udp;

pub use remote::*;
pub use rpc::*;
pub use udp::*;

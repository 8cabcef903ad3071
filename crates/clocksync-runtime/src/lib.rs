//! clocksync Runtime - Coordinator and node processes
//!
//! This crate implements:
//! - The client registry
//! - The Berkeley round (gather, average, distribute)
//! - Round reports
//! - Per-role request dispatch and the coordinator/node serve loops
//! - The operator shell
//! - Configuration and logging setup

pub mod config;
pub mod coordinator;
pub mod node;
pub mod registry;
pub mod report;
pub mod round;
pub mod server;
pub mod service;
pub mod shell;
pub mod telemetry;

pub use config::*;
pub use coordinator::*;
pub use node::*;
pub use registry::*;
pub use report::*;
pub use round::Rounding;
pub use server::*;
pub use service::*;
pub use shell::*;
pub use telemetry::*;

//! clocksync Test Harness - Simulated fleets and end-to-end checks
//!
//! This crate provides:
//! - Simulated clock nodes with injected latency and failures
//! - A seeded fleet harness for round scenarios and convergence checks
//! - A loopback UDP cluster running the real coordinator and node runtimes

pub mod harness;
pub mod loopback;
pub mod simulator;

pub use harness::*;
pub use loopback::*;
pub use simulator::*;

//! clocksync Time - Clocks and the passive clock node
//!
//! This crate implements:
//! - Real time sources (system wall clock, manual for simulation)
//! - The offset clock (real time + additive offset)
//! - The Clock Node that serves queries and adjustments
//! - Human-readable time formatting

pub mod clock;
pub mod format;
pub mod node;

pub use clock::*;
pub use format::*;
pub use node::*;

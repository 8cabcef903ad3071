//! clocksync Wire Protocol - Binary datagram format
//!
//! This crate implements the wire format for clocksync datagrams:
//! - Fixed header (14 bytes)
//! - Request / response payloads

pub mod frame;
pub mod header;
pub mod message;

pub use frame::*;
pub use header::*;
pub use message::*;

//! clocksync core - Fundamental types and contracts
//!
//! This crate defines the types shared by every other clocksync crate:
//! - Identifiers (NodeId)
//! - Time primitives (Timestamp, ClockOffset)
//! - The role-split remote clock service contract
//! - The error taxonomy

pub mod capability;
pub mod error;
pub mod id;
pub mod time;

pub use capability::*;
pub use error::*;
pub use id::*;
pub use time::*;

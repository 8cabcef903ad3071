//! Error types for clocksync

use std::time::Duration;

use thiserror::Error;

use crate::NodeId;

/// Role a party plays in a synchronization group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Node,
    Coordinator,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Node => f.write_str("node"),
            Role::Coordinator => f.write_str("coordinator"),
        }
    }
}

/// Core clocksync errors
#[derive(Error, Debug)]
pub enum SyncError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message tag: {0:#04x}")]
    UnknownMessageTag(u8),

    // Remote call errors
    #[error("Communication with {peer} failed: {reason}")]
    Communication { peer: String, reason: String },

    #[error("Call to {peer} timed out after {after:?}")]
    Timeout { peer: String, after: Duration },

    #[error("Unexpected response from {peer}: expected {expected}, got {got}")]
    UnexpectedResponse {
        peer: String,
        expected: &'static str,
        got: String,
    },

    #[error("Remote error from {peer}: {message}")]
    Remote { peer: String, message: String },

    // Contract errors
    #[error("Operation {operation} is not supported by a {role}")]
    UnsupportedCapability { operation: String, role: Role },

    #[error("Invalid node identity: {0:?}")]
    InvalidNodeId(NodeId),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Endpoint closed")]
    EndpointClosed,
}

impl SyncError {
    /// True for failures of a call against a remote party.
    /// These evict the party from the registry during a round.
    pub fn is_communication_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Communication { .. }
                | SyncError::Timeout { .. }
                | SyncError::UnexpectedResponse { .. }
                | SyncError::Remote { .. }
                | SyncError::EndpointClosed
        )
    }

    pub fn unsupported(operation: impl Into<String>, role: Role) -> Self {
        SyncError::UnsupportedCapability {
            operation: operation.into(),
            role,
        }
    }
}

/// Result type for clocksync operations
pub type SyncResult<T> = Result<T, SyncError>;

//! Identity types for clocksync
//!
//! A node is named by an operator-chosen string that is unique within a
//! synchronization group. The name never changes once assigned.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Maximum identity length in bytes (must fit a wire string)
pub const MAX_NODE_ID_LEN: usize = 255;

/// Node identity - opaque, immutable, cheap to clone
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Identity the coordinator uses for its own clock
    pub const COORDINATOR: &'static str = "server";

    #[inline]
    pub fn new(id: impl AsRef<str>) -> Self {
        NodeId(Arc::from(id.as_ref()))
    }

    /// The coordinator's own identity
    #[inline]
    pub fn coordinator() -> Self {
        NodeId::new(Self::COORDINATOR)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the identity can be carried on the wire
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= MAX_NODE_ID_LEN
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(Arc::from(id))
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

//! Remote clock service contract, split by role
//!
//! A node serves [`NodeCapability`]; a coordinator additionally serves
//! [`CoordinatorCapability`]. Every method may fail: implementations backed
//! by a network proxy can lose their peer at any time.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{NodeId, SyncResult, Timestamp};

/// Operations every clock participant serves
#[async_trait]
pub trait NodeCapability: Send + Sync {
    /// Current local time (real clock plus offset). No side effects.
    async fn query_time(&self) -> SyncResult<Timestamp>;

    /// Add `delta_ms` to the stored offset.
    /// Additive: applying the same delta twice doubles its effect.
    async fn apply_adjustment(&self, delta_ms: i64) -> SyncResult<()>;

    /// Stable name of the callee
    async fn identity(&self) -> SyncResult<NodeId>;

    /// Lightweight liveness probe. A transport failure means unreachable
    /// regardless of what this would have returned.
    async fn is_reachable(&self) -> SyncResult<bool>;

    /// Reference time for diagnostic display; no effect on the clock
    async fn notify_checkpoint(&self, reference: Timestamp) -> SyncResult<()>;
}

/// Handle to a (possibly remote) clock participant
pub type RemoteHandle = Arc<dyn NodeCapability>;

/// Operations only a coordinator serves
#[async_trait]
pub trait CoordinatorCapability: Send + Sync {
    /// Add or replace the registry entry for `id`. Last writer wins.
    async fn register(&self, id: NodeId, handle: RemoteHandle) -> SyncResult<()>;

    /// Start a synchronization round. May return before the round completes.
    async fn trigger_synchronization(&self) -> SyncResult<()>;
}

/// Pointer identity of two handles, ignoring vtables
#[inline]
pub fn same_handle(a: &RemoteHandle, b: &RemoteHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

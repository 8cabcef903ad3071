//! Clock Node - a passive clock participant
//!
//! Holds an identity and an offset clock. It answers queries and applies
//! adjustments; it never talks to other nodes on its own.

use std::sync::Arc;

use async_trait::async_trait;

use clocksync_core::{ClockOffset, NodeCapability, NodeId, SyncResult, Timestamp};

use crate::{fmt_millis, OffsetClock, TimeSource};

/// Local clock participant
pub struct ClockNode {
    id: NodeId,
    clock: OffsetClock,
}

impl ClockNode {
    pub fn new(id: NodeId, clock: OffsetClock) -> Self {
        ClockNode { id, clock }
    }

    /// Node on the system wall clock with an initial simulated skew
    pub fn system(id: NodeId, initial: ClockOffset) -> Self {
        Self::new(id, OffsetClock::system(initial))
    }

    pub fn with_source(id: NodeId, source: Arc<dyn TimeSource>, initial: ClockOffset) -> Self {
        Self::new(id, OffsetClock::new(source, initial))
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn clock(&self) -> &OffsetClock {
        &self.clock
    }

    /// Current adjusted time
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn offset(&self) -> ClockOffset {
        self.clock.offset()
    }

    /// Apply an additive adjustment, returning the new offset
    pub fn adjust(&self, delta_ms: i64) -> ClockOffset {
        let offset = self.clock.adjust(ClockOffset::from_millis(delta_ms));
        tracing::info!(
            node = %self.id,
            delta_ms,
            offset_ms = offset.as_millis(),
            local = %fmt_millis(self.clock.now()),
            "Applied clock adjustment"
        );
        offset
    }
}

#[async_trait]
impl NodeCapability for ClockNode {
    async fn query_time(&self) -> SyncResult<Timestamp> {
        let now = self.clock.now();
        tracing::debug!(node = %self.id, time = %fmt_millis(now), ms = now.as_millis(), "query_time");
        Ok(now)
    }

    async fn apply_adjustment(&self, delta_ms: i64) -> SyncResult<()> {
        self.adjust(delta_ms);
        Ok(())
    }

    async fn identity(&self) -> SyncResult<NodeId> {
        Ok(self.id.clone())
    }

    async fn is_reachable(&self) -> SyncResult<bool> {
        Ok(true)
    }

    async fn notify_checkpoint(&self, reference: Timestamp) -> SyncResult<()> {
        self.clock.record_checkpoint(reference);
        tracing::info!(
            node = %self.id,
            reference = %fmt_millis(reference),
            local = %fmt_millis(self.clock.now()),
            "Checkpoint from coordinator"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualTimeSource;

    fn node(offset: i64) -> ClockNode {
        let source = Arc::new(ManualTimeSource::new(Timestamp(10_000)));
        ClockNode::with_source(NodeId::new("client1"), source, ClockOffset(offset))
    }

    #[tokio::test]
    async fn test_query_reports_offset_time() {
        let node = node(50);
        assert_eq!(node.query_time().await.unwrap(), Timestamp(10_050));
    }

    #[tokio::test]
    async fn test_adjustment_accumulates() {
        let node = node(60);
        node.apply_adjustment(-57).await.unwrap();
        assert_eq!(node.offset(), ClockOffset(3));
        assert_eq!(node.query_time().await.unwrap(), Timestamp(10_003));
    }

    #[tokio::test]
    async fn test_adjust_and_revert() {
        let node = node(-50);
        node.apply_adjustment(53).await.unwrap();
        node.apply_adjustment(-53).await.unwrap();
        assert_eq!(node.offset(), ClockOffset(-50));
    }

    #[tokio::test]
    async fn test_identity_and_liveness() {
        let node = node(0);
        assert_eq!(node.identity().await.unwrap(), NodeId::new("client1"));
        assert!(node.is_reachable().await.unwrap());
    }

    #[tokio::test]
    async fn test_checkpoint_has_no_effect_on_time() {
        let node = node(5);
        node.notify_checkpoint(Timestamp(9_000)).await.unwrap();
        assert_eq!(node.query_time().await.unwrap(), Timestamp(10_005));
        assert_eq!(node.clock().last_checkpoint(), Some(Timestamp(9_000)));
    }
}

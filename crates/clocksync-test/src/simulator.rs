//! Simulated clock nodes
//!
//! Every simulated node reads the same hand-driven time source as the
//! coordinator. Network latency is modelled by advancing that source, half
//! before the node reads its clock and half after, so the coordinator sees
//! a round trip of exactly `latency`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use clocksync_core::{ClockOffset, NodeCapability, NodeId, SyncError, SyncResult, Timestamp};
use clocksync_time::{ClockNode, ManualTimeSource};

/// How a simulated node misbehaves
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Behavior {
    #[default]
    Healthy,
    /// Time queries fail with a communication error
    FailQuery,
    /// Adjustments fail with a communication error
    FailAdjust,
    /// Time queries never return
    Hang,
    /// Checkpoint notifications fail
    FailCheckpoint,
}

/// Description of one simulated node
#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub id: NodeId,
    pub offset_ms: i64,
    /// Full round trip as seen by the coordinator
    pub latency: Duration,
    pub behavior: Behavior,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, offset_ms: i64) -> Self {
        NodeSpec {
            id: id.into(),
            offset_ms,
            latency: Duration::ZERO,
            behavior: Behavior::Healthy,
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }
}

/// A simulated node reachable as a [`NodeCapability`]
pub struct SimulatedNode {
    clock: ClockNode,
    source: Arc<ManualTimeSource>,
    latency: Duration,
    behavior: Mutex<Behavior>,
    queries: AtomicU64,
    adjustments: AtomicU64,
    checkpoints: AtomicU64,
}

impl SimulatedNode {
    pub fn new(spec: &NodeSpec, source: Arc<ManualTimeSource>) -> Self {
        let clock = ClockNode::with_source(
            spec.id.clone(),
            source.clone(),
            ClockOffset::from_millis(spec.offset_ms),
        );
        SimulatedNode {
            clock,
            source,
            latency: spec.latency,
            behavior: Mutex::new(spec.behavior),
            queries: AtomicU64::new(0),
            adjustments: AtomicU64::new(0),
            checkpoints: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &NodeId {
        self.clock.id()
    }

    pub fn offset(&self) -> ClockOffset {
        self.clock.offset()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn last_checkpoint(&self) -> Option<Timestamp> {
        self.clock.clock().last_checkpoint()
    }

    pub fn behavior(&self) -> Behavior {
        *self.behavior.lock()
    }

    /// Change behaviour between rounds
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn adjustments(&self) -> u64 {
        self.adjustments.load(Ordering::Relaxed)
    }

    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    fn refused(&self, what: &str) -> SyncError {
        SyncError::Communication {
            peer: self.id().to_string(),
            reason: format!("simulated {} failure", what),
        }
    }
}

#[async_trait]
impl NodeCapability for SimulatedNode {
    async fn query_time(&self) -> SyncResult<Timestamp> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        match self.behavior() {
            Behavior::FailQuery => Err(self.refused("query")),
            Behavior::Hang => std::future::pending().await,
            _ => {
                let there = self.latency / 2;
                self.source.advance(there);
                let reported = self.clock.now();
                self.source.advance(self.latency - there);
                Ok(reported)
            }
        }
    }

    async fn apply_adjustment(&self, delta_ms: i64) -> SyncResult<()> {
        if self.behavior() == Behavior::FailAdjust {
            return Err(self.refused("adjustment"));
        }
        self.adjustments.fetch_add(1, Ordering::Relaxed);
        self.clock.adjust(delta_ms);
        Ok(())
    }

    async fn identity(&self) -> SyncResult<NodeId> {
        Ok(self.id().clone())
    }

    async fn is_reachable(&self) -> SyncResult<bool> {
        Ok(!matches!(self.behavior(), Behavior::FailQuery | Behavior::Hang))
    }

    async fn notify_checkpoint(&self, reference: Timestamp) -> SyncResult<()> {
        if self.behavior() == Behavior::FailCheckpoint {
            return Err(self.refused("checkpoint"));
        }
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
        self.clock.notify_checkpoint(reference).await
    }
}

//! Synchronization Coordinator
//!
//! Runs Berkeley rounds over the client registry:
//! 1. Read the coordinator's own clock as the reference
//! 2. Query every registered node, correcting for half the round trip
//! 3. Average all skews, the coordinator's own 0 included
//! 4. Push each participant the correction onto the average
//!
//! A node that fails or times out in either phase is evicted and the round
//! carries on without it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use clocksync_core::{
    CoordinatorCapability, NodeCapability, NodeId, RemoteHandle, SyncError, SyncResult, Timestamp,
};
use clocksync_time::ClockNode;

use crate::round::{adjustment_for, average_skew, Sample};
use crate::{ClientRegistry, CoordinatorConfig, NodeOutcome, RoundReport};

struct CoordinatorInner {
    node: Arc<ClockNode>,
    registry: Arc<ClientRegistry>,
    config: CoordinatorConfig,
    round_lock: tokio::sync::Mutex<()>,
    rounds: AtomicU64,
    last_report: Mutex<Option<Arc<RoundReport>>>,
}

/// Coordinator handle; clones share the same state
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

/// Per-node progress through a round
struct Entry {
    handle: RemoteHandle,
    outcome: NodeOutcome,
}

impl Coordinator {
    /// Coordinator around `node` (its own clock) and an injected registry
    pub fn new(
        node: Arc<ClockNode>,
        registry: Arc<ClientRegistry>,
        config: CoordinatorConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Coordinator {
            inner: Arc::new(CoordinatorInner {
                node,
                registry,
                config,
                round_lock: tokio::sync::Mutex::new(()),
                rounds: AtomicU64::new(0),
                last_report: Mutex::new(None),
            }),
        })
    }

    /// Coordinator named "server" on the system clock
    pub fn system(registry: Arc<ClientRegistry>, config: CoordinatorConfig) -> SyncResult<Self> {
        let node = ClockNode::system(NodeId::coordinator(), Default::default());
        Self::new(Arc::new(node), registry, config)
    }

    pub fn id(&self) -> &NodeId {
        self.inner.node.id()
    }

    /// The coordinator's own clock
    pub fn node(&self) -> &Arc<ClockNode> {
        &self.inner.node
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn now(&self) -> Timestamp {
        self.inner.node.now()
    }

    pub fn rounds_completed(&self) -> u64 {
        self.inner.rounds.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<Arc<RoundReport>> {
        self.inner.last_report.lock().clone()
    }

    /// Add or replace a registry entry. Returns true on replacement.
    pub fn register_node(&self, id: NodeId, handle: RemoteHandle) -> SyncResult<bool> {
        if !id.is_valid() || &id == self.id() {
            return Err(SyncError::InvalidNodeId(id));
        }
        let replaced = self.inner.registry.register(id.clone(), handle);
        tracing::info!(
            node = %id,
            replaced,
            registered = self.inner.registry.len(),
            "Node registered"
        );
        Ok(replaced)
    }

    /// Run a round in the background
    pub fn trigger(&self) -> JoinHandle<SyncResult<Arc<RoundReport>>> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let result = coordinator.run_round().await;
            if let Err(e) = &result {
                tracing::error!("Synchronization round failed: {}", e);
            }
            result
        })
    }

    /// Run one complete round. Concurrent calls run one after another.
    pub async fn run_round(&self) -> SyncResult<Arc<RoundReport>> {
        let _guard = self.inner.round_lock.lock().await;
        let config = &self.inner.config;
        let own = self.inner.node.clone();
        let round = self.inner.rounds.load(Ordering::Relaxed) + 1;

        let reference = own.query_time().await?;
        let snapshot = self.inner.registry.snapshot();
        tracing::debug!(round, nodes = snapshot.len(), %reference, "Round started");

        // Gather
        let clock = own.clone();
        let samples = self
            .fan_out(snapshot, move |_, handle| {
                let clock = clock.clone();
                async move {
                    let started = clock.now();
                    let reported = handle.query_time().await?;
                    let finished = clock.now();
                    Ok::<_, SyncError>(Sample {
                        reported,
                        started,
                        finished,
                    })
                }
            })
            .await;

        let mut entries: BTreeMap<NodeId, Entry> = BTreeMap::new();
        let mut failed: Vec<NodeOutcome> = Vec::new();
        for (id, handle, result) in samples {
            match result {
                Ok(sample) => {
                    let outcome = NodeOutcome {
                        id: id.clone(),
                        reported: Some(sample.reported),
                        rtt_ms: Some(sample.rtt_ms()),
                        adjusted: Some(sample.adjusted()),
                        skew_ms: Some(sample.skew(reference)),
                        adjustment_ms: None,
                        evicted: false,
                        failure: None,
                    };
                    entries.insert(id, Entry { handle, outcome });
                }
                Err(e) => {
                    self.evict(&id, &handle, &e);
                    failed.push(NodeOutcome::failed(id, e.to_string()));
                }
            }
        }

        // Reduce
        let mut skews = Vec::with_capacity(entries.len() + 1);
        skews.push(0);
        skews.extend(entries.values().filter_map(|e| e.outcome.skew_ms));
        let average = average_skew(&skews);

        // Distribute
        let own_adjustment = adjustment_for(average, 0, config.rounding);
        own.adjust(own_adjustment);

        let deltas: BTreeMap<NodeId, i64> = entries
            .iter()
            .map(|(id, entry)| {
                let skew = entry.outcome.skew_ms.unwrap_or_default();
                (id.clone(), adjustment_for(average, skew, config.rounding))
            })
            .collect();
        let targets: Vec<(NodeId, RemoteHandle)> = entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.handle.clone()))
            .collect();

        let results = self
            .fan_out(targets, |id, handle| {
                let delta = deltas.get(id).copied().unwrap_or_default();
                async move { handle.apply_adjustment(delta).await }
            })
            .await;
        for (id, handle, result) in results {
            let Some(entry) = entries.get_mut(&id) else {
                continue;
            };
            match result {
                Ok(()) => entry.outcome.adjustment_ms = deltas.get(&id).copied(),
                Err(e) => {
                    self.evict(&id, &handle, &e);
                    entry.outcome.evicted = true;
                    entry.outcome.failure = Some(e.to_string());
                }
            }
        }

        let new_time = own.now();
        if config.notify_checkpoints {
            self.notify_checkpoints(&entries, new_time).await;
        }

        let mut nodes = Vec::with_capacity(entries.len() + failed.len() + 1);
        nodes.push(NodeOutcome {
            id: own.id().clone(),
            reported: Some(reference),
            rtt_ms: Some(0),
            adjusted: Some(reference),
            skew_ms: Some(0),
            adjustment_ms: Some(own_adjustment),
            evicted: false,
            failure: None,
        });
        let mut rest: Vec<NodeOutcome> = entries
            .into_values()
            .map(|e| e.outcome)
            .chain(failed)
            .collect();
        rest.sort_by(|a, b| a.id.cmp(&b.id));
        nodes.extend(rest);

        let report = Arc::new(RoundReport {
            round,
            reference,
            average_skew_ms: average,
            rounding: config.rounding,
            new_time,
            nodes,
        });
        report.log();

        self.inner.rounds.store(round, Ordering::Relaxed);
        *self.inner.last_report.lock() = Some(report.clone());
        Ok(report)
    }

    /// Poll the registry until every id in `expected` is present or
    /// `timeout` elapses. Returns the ids still missing.
    pub async fn await_registrations(
        &self,
        expected: &[NodeId],
        timeout: Duration,
        poll: Duration,
    ) -> Vec<NodeId> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let missing: Vec<NodeId> = expected
                .iter()
                .filter(|id| !self.inner.registry.contains(id))
                .cloned()
                .collect();
            if missing.is_empty() {
                tracing::info!(expected = expected.len(), "All expected nodes registered");
                return missing;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                let names: Vec<&str> = missing.iter().map(NodeId::as_str).collect();
                tracing::warn!(missing = ?names, "Gave up waiting for nodes");
                return missing;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Trigger a round every `period` until the returned future is dropped
    pub async fn run_periodic(&self, period: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_round().await {
                tracing::error!("Periodic round failed: {}", e);
            }
        }
    }

    async fn notify_checkpoints(&self, entries: &BTreeMap<NodeId, Entry>, reference: Timestamp) {
        let targets: Vec<(NodeId, RemoteHandle)> = entries
            .iter()
            .filter(|(_, e)| !e.outcome.evicted)
            .map(|(id, e)| (id.clone(), e.handle.clone()))
            .collect();
        let results = self
            .fan_out(targets, move |_, handle| async move {
                handle.notify_checkpoint(reference).await
            })
            .await;
        for (id, _, result) in results {
            if let Err(e) = result {
                tracing::debug!(node = %id, "Checkpoint not delivered: {}", e);
            }
        }
    }

    fn evict(&self, id: &NodeId, handle: &RemoteHandle, cause: &SyncError) {
        let removed = self.inner.registry.evict(id, handle);
        tracing::warn!(node = %id, removed, "Evicting node: {}", cause);
    }

    /// Run `op` against every target, at most `max_concurrency` at a time,
    /// each bounded by `call_timeout`. Results come back in target order.
    async fn fan_out<T, F, Fut>(
        &self,
        targets: Vec<(NodeId, RemoteHandle)>,
        op: F,
    ) -> Vec<(NodeId, RemoteHandle, SyncResult<T>)>
    where
        T: Send + 'static,
        F: Fn(&NodeId, RemoteHandle) -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let limit = self.inner.config.max_concurrency.min(Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(limit));
        let timeout = self.inner.config.call_timeout;

        let mut tasks = JoinSet::new();
        for (index, (id, handle)) in targets.iter().enumerate() {
            let call = op(id, handle.clone());
            let semaphore = semaphore.clone();
            let peer = id.to_string();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout {
                        peer,
                        after: timeout,
                    }),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<SyncResult<T>>> = targets.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::warn!("Round task failed: {}", e),
            }
        }

        targets
            .into_iter()
            .zip(results)
            .map(|((id, handle), result)| {
                let result = result.unwrap_or_else(|| {
                    Err(SyncError::Communication {
                        peer: id.to_string(),
                        reason: "call aborted".to_string(),
                    })
                });
                (id, handle, result)
            })
            .collect()
    }
}

#[async_trait]
impl CoordinatorCapability for Coordinator {
    async fn register(&self, id: NodeId, handle: RemoteHandle) -> SyncResult<()> {
        self.register_node(id, handle).map(|_| ())
    }

    async fn trigger_synchronization(&self) -> SyncResult<()> {
        drop(self.trigger());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clocksync_core::ClockOffset;
    use clocksync_time::{ManualTimeSource, TimeSource};

    /// Node that answers queries but refuses adjustments
    struct RefusesAdjustment(ClockNode);

    #[async_trait]
    impl NodeCapability for RefusesAdjustment {
        async fn query_time(&self) -> SyncResult<Timestamp> {
            self.0.query_time().await
        }

        async fn apply_adjustment(&self, _delta_ms: i64) -> SyncResult<()> {
            Err(SyncError::Communication {
                peer: self.0.id().to_string(),
                reason: "connection refused".into(),
            })
        }

        async fn identity(&self) -> SyncResult<NodeId> {
            self.0.identity().await
        }

        async fn is_reachable(&self) -> SyncResult<bool> {
            Ok(true)
        }

        async fn notify_checkpoint(&self, _reference: Timestamp) -> SyncResult<()> {
            Ok(())
        }
    }

    fn setup() -> (Coordinator, Arc<ManualTimeSource>) {
        let source = Arc::new(ManualTimeSource::new(Timestamp(10_000)));
        let own = ClockNode::with_source(NodeId::coordinator(), source.clone(), ClockOffset::ZERO);
        let config = CoordinatorConfig {
            max_concurrency: 1,
            call_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let coordinator =
            Coordinator::new(Arc::new(own), Arc::new(ClientRegistry::new()), config).unwrap();
        (coordinator, source)
    }

    fn clock_node(source: &Arc<ManualTimeSource>, id: &str, offset: i64) -> Arc<ClockNode> {
        let source: Arc<dyn TimeSource> = source.clone();
        Arc::new(ClockNode::with_source(NodeId::new(id), source, ClockOffset(offset)))
    }

    #[tokio::test]
    async fn test_empty_round_is_not_an_error() {
        let (coordinator, _) = setup();
        let report = coordinator.run_round().await.unwrap();
        assert_eq!(report.average_skew_ms, 0.0);
        assert_eq!(report.adjustment(&NodeId::coordinator()), Some(0));
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(coordinator.rounds_completed(), 1);
    }

    #[tokio::test]
    async fn test_round_converges_clocks() {
        let (coordinator, source) = setup();
        let a = clock_node(&source, "a", 60);
        let b = clock_node(&source, "b", -50);
        coordinator.register_node(NodeId::new("a"), a.clone()).unwrap();
        coordinator.register_node(NodeId::new("b"), b.clone()).unwrap();

        let report = coordinator.run_round().await.unwrap();
        assert_eq!(report.skew(&NodeId::new("a")), Some(60));
        assert_eq!(report.skew(&NodeId::new("b")), Some(-50));
        assert_eq!(report.adjustment(&NodeId::coordinator()), Some(3));
        assert_eq!(report.adjustment(&NodeId::new("a")), Some(-57));
        assert_eq!(report.adjustment(&NodeId::new("b")), Some(53));

        assert_eq!(a.offset(), ClockOffset(3));
        assert_eq!(b.offset(), ClockOffset(3));
        assert_eq!(coordinator.node().offset(), ClockOffset(3));
        assert_eq!(a.clock().last_checkpoint(), Some(Timestamp(10_003)));
    }

    #[tokio::test]
    async fn test_failed_adjustment_evicts_but_keeps_skew() {
        let (coordinator, source) = setup();
        let stubborn = RefusesAdjustment(ClockNode::with_source(
            NodeId::new("x"),
            source.clone(),
            ClockOffset(30),
        ));
        coordinator
            .register_node(NodeId::new("x"), Arc::new(stubborn))
            .unwrap();

        let report = coordinator.run_round().await.unwrap();
        let x = report.outcome(&NodeId::new("x")).unwrap();
        assert_eq!(x.skew_ms, Some(30));
        assert!(x.evicted);
        assert_eq!(x.adjustment_ms, None);
        assert_eq!(report.adjustment(&NodeId::coordinator()), Some(15));
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_coordinator_identity_is_reserved() {
        let (coordinator, source) = setup();
        let imposter = clock_node(&source, "server", 0);
        assert!(matches!(
            coordinator.register_node(NodeId::coordinator(), imposter),
            Err(SyncError::InvalidNodeId(_))
        ));
    }

    #[tokio::test]
    async fn test_await_registrations_reports_missing() {
        let (coordinator, source) = setup();
        coordinator
            .register_node(NodeId::new("a"), clock_node(&source, "a", 0))
            .unwrap();

        let missing = coordinator
            .await_registrations(
                &[NodeId::new("a"), NodeId::new("b")],
                Duration::from_millis(60),
                Duration::from_millis(10),
            )
            .await;
        assert_eq!(missing, vec![NodeId::new("b")]);
    }

    #[tokio::test]
    async fn test_trigger_through_capability() {
        let (coordinator, _) = setup();
        let capability: &dyn CoordinatorCapability = &coordinator;
        capability.trigger_synchronization().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while coordinator.rounds_completed() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        coordinator.run_round().await.unwrap();
        assert_eq!(coordinator.rounds_completed(), 2);
        assert_eq!(coordinator.last_report().unwrap().round, 2);
    }
}

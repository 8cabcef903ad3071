//! Simulated fleet harness
//!
//! Builds a coordinator and a set of [`SimulatedNode`]s on one manual time
//! source, runs rounds and measures how far apart the clocks are.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use clocksync_core::{NodeId, SyncResult, Timestamp};
use clocksync_runtime::{ClientRegistry, Coordinator, CoordinatorConfig, RoundReport, Rounding};
use clocksync_time::{ClockNode, ManualTimeSource};

use crate::simulator::{Behavior, NodeSpec, SimulatedNode};

/// Coordinator time when every simulation starts
pub const SIMULATION_START: Timestamp = Timestamp(10_000);

#[derive(Clone, Debug)]
pub struct FleetConfig {
    /// Number of randomly generated nodes
    pub node_count: usize,
    /// Offsets are drawn from `-max_skew_ms..=max_skew_ms`
    pub max_skew_ms: i64,
    /// Round trips are drawn from `0..=max_latency`
    pub max_latency: Duration,
    /// Fraction of nodes (0.0 - 1.0) whose queries fail
    pub failure_rate: f64,
    pub seed: u64,
    pub coordinator: CoordinatorConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        FleetConfig {
            node_count: 3,
            max_skew_ms: 100,
            max_latency: Duration::ZERO,
            failure_rate: 0.0,
            seed: 0,
            coordinator: CoordinatorConfig {
                max_concurrency: 1,
                call_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        }
    }
}

impl FleetConfig {
    /// Two nodes, no latency
    pub fn minimal() -> Self {
        FleetConfig {
            node_count: 2,
            ..Default::default()
        }
    }

    pub fn standard() -> Self {
        Self::default()
    }

    /// Many nodes, wide skews, some latency and failures
    pub fn stress() -> Self {
        FleetConfig {
            node_count: 64,
            max_skew_ms: 60_000,
            max_latency: Duration::from_millis(40),
            failure_rate: 0.1,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_rounding(mut self, rounding: Rounding) -> Self {
        self.coordinator.rounding = rounding;
        self
    }

    /// Draw node specs from the configured distributions
    pub fn generate(&self) -> Vec<NodeSpec> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let max_latency_ms = self.max_latency.as_millis() as u64;
        (0..self.node_count)
            .map(|i| {
                let offset = rng.gen_range(-self.max_skew_ms..=self.max_skew_ms);
                let latency = Duration::from_millis(rng.gen_range(0..=max_latency_ms));
                let behavior = if rng.gen_bool(self.failure_rate.clamp(0.0, 1.0)) {
                    Behavior::FailQuery
                } else {
                    Behavior::Healthy
                };
                NodeSpec::new(format!("node{:03}", i), offset)
                    .latency(latency)
                    .behavior(behavior)
            })
            .collect()
    }
}

/// Coordinator plus simulated fleet
pub struct SyncHarness {
    coordinator: Coordinator,
    source: Arc<ManualTimeSource>,
    nodes: Vec<Arc<SimulatedNode>>,
}

impl SyncHarness {
    /// Fleet drawn from `config`
    pub fn new(config: FleetConfig) -> SyncResult<Self> {
        let specs = config.generate();
        Self::with_nodes(config.coordinator, specs)
    }

    /// Fleet with explicit node specs, all registered
    pub fn with_nodes(config: CoordinatorConfig, specs: Vec<NodeSpec>) -> SyncResult<Self> {
        let source = Arc::new(ManualTimeSource::new(SIMULATION_START));
        let own = ClockNode::with_source(NodeId::coordinator(), source.clone(), Default::default());
        let coordinator = Coordinator::new(Arc::new(own), Arc::new(ClientRegistry::new()), config)?;

        let mut harness = SyncHarness {
            coordinator,
            source,
            nodes: Vec::new(),
        };
        for spec in specs {
            harness.add_node(spec)?;
        }
        Ok(harness)
    }

    /// Create and register another node
    pub fn add_node(&mut self, spec: NodeSpec) -> SyncResult<Arc<SimulatedNode>> {
        let node = Arc::new(SimulatedNode::new(&spec, self.source.clone()));
        self.coordinator.register_node(spec.id.clone(), node.clone())?;
        self.nodes.push(node.clone());
        Ok(node)
    }

    /// Register `id` again with a brand new handle
    pub fn reregister(&mut self, id: &NodeId) -> SyncResult<Option<Arc<SimulatedNode>>> {
        let Some(old) = self.node(id) else {
            return Ok(None);
        };
        let spec = NodeSpec::new(id.clone(), old.offset().as_millis());
        self.nodes.retain(|n| n.id() != id);
        self.add_node(spec).map(Some)
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn source(&self) -> &Arc<ManualTimeSource> {
        &self.source
    }

    pub fn nodes(&self) -> &[Arc<SimulatedNode>] {
        &self.nodes
    }

    pub fn node(&self, id: &NodeId) -> Option<Arc<SimulatedNode>> {
        self.nodes.iter().find(|n| n.id() == id).cloned()
    }

    pub async fn run_round(&self) -> SyncResult<Arc<RoundReport>> {
        self.coordinator.run_round().await
    }

    /// Largest offset difference among the coordinator and every node still
    /// registered
    pub fn spread_ms(&self) -> i64 {
        let registry = self.coordinator.registry();
        let offsets = self
            .nodes
            .iter()
            .filter(|n| registry.contains(n.id()))
            .map(|n| n.offset().as_millis())
            .chain(std::iter::once(self.coordinator.node().offset().as_millis()));

        let (min, max) = offsets.fold((i64::MAX, i64::MIN), |(lo, hi), o| (lo.min(o), hi.max(o)));
        max.saturating_sub(min)
    }
}

/// Outcome of a multi-round simulation
#[derive(Clone, Debug)]
pub struct SimulationResult {
    pub rounds: usize,
    pub spread_before_ms: i64,
    pub spread_after_ms: i64,
    pub evicted: Vec<NodeId>,
    pub survivors: usize,
}

impl SimulationResult {
    pub fn converged(&self, tolerance_ms: i64) -> bool {
        self.spread_after_ms <= tolerance_ms
    }
}

/// Run `rounds` rounds over the fleet described by `config`
pub async fn simulate(config: FleetConfig, rounds: usize) -> SyncResult<SimulationResult> {
    let harness = SyncHarness::new(config)?;
    let spread_before_ms = harness.spread_ms();
    let mut evicted = Vec::new();
    for _ in 0..rounds {
        let report = harness.run_round().await?;
        evicted.extend(report.evicted());
    }
    Ok(SimulationResult {
        rounds,
        spread_before_ms,
        spread_after_ms: harness.spread_ms(),
        evicted,
        survivors: harness.coordinator().registry().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clocksync_core::{same_handle, ClockOffset, RemoteHandle};
    use clocksync_runtime::{Command, Reply, Shell};
    use clocksync_time::TimeSource;

    fn config() -> CoordinatorConfig {
        FleetConfig::default().coordinator
    }

    #[tokio::test]
    async fn test_three_participant_scenario() {
        // client1 answers instantly 50 ms behind; client2 reports 10050
        // after a 20 ms round trip
        let harness = SyncHarness::with_nodes(
            config(),
            vec![
                NodeSpec::new("client1", -50),
                NodeSpec::new("client2", 40).latency(Duration::from_millis(20)),
            ],
        )
        .unwrap();

        let report = harness.run_round().await.unwrap();
        let client2 = report.outcome(&NodeId::new("client2")).unwrap();
        assert_eq!(client2.reported, Some(Timestamp(10_050)));
        assert_eq!(client2.rtt_ms, Some(20));

        assert_eq!(report.skew(&NodeId::coordinator()), Some(0));
        assert_eq!(report.skew(&NodeId::new("client1")), Some(-50));
        assert_eq!(report.skew(&NodeId::new("client2")), Some(60));
        assert_eq!(format!("{:.2}", report.average_skew_ms), "3.33");
        assert_eq!(report.adjustment(&NodeId::coordinator()), Some(3));
        assert_eq!(report.adjustment(&NodeId::new("client2")), Some(-57));
        assert_eq!(report.adjustment(&NodeId::new("client1")), Some(53));
    }

    #[tokio::test]
    async fn test_truncation_reproduces_cast_rounding() {
        let harness = SyncHarness::with_nodes(
            FleetConfig::default().with_rounding(Rounding::Truncate).coordinator,
            vec![NodeSpec::new("a", 60), NodeSpec::new("b", -50)],
        )
        .unwrap();

        let report = harness.run_round().await.unwrap();
        assert_eq!(report.adjustment(&NodeId::coordinator()), Some(3));
        assert_eq!(report.adjustment(&NodeId::new("a")), Some(-56));
        assert_eq!(report.adjustment(&NodeId::new("b")), Some(53));
    }

    #[tokio::test]
    async fn test_far_future_clocks_do_not_break_a_round() {
        let harness = SyncHarness::with_nodes(
            config(),
            vec![
                NodeSpec::new("far", 600_000_000_000_000),
                NodeSpec::new("max", i64::MAX).latency(Duration::from_millis(20)),
            ],
        )
        .unwrap();
        let shell = Shell::new(harness.coordinator().clone());

        let Reply::Text(text) = shell.execute(Command::Sync).await else {
            panic!("sync does not exit the shell");
        };
        assert!(text.contains("Coordinator time now"));
        assert!(text.ends_with("ms"));

        let report = harness.coordinator().last_report().unwrap();
        assert!(report.evicted().is_empty());
        assert_eq!(
            report.outcome(&NodeId::new("max")).unwrap().adjusted,
            Some(Timestamp(i64::MAX))
        );
    }

    async fn register_during_round(max_concurrency: usize) {
        let config = CoordinatorConfig {
            max_concurrency,
            ..config()
        };
        let mut harness = SyncHarness::with_nodes(
            config,
            vec![
                NodeSpec::new("stale", 40).behavior(Behavior::Hang),
                NodeSpec::new("steady", 30),
            ],
        )
        .unwrap();
        let hung = harness.node(&NodeId::new("stale")).unwrap();

        let round = harness.coordinator().trigger();
        while hung.queries() == 0 {
            tokio::task::yield_now().await;
        }

        // Both land while the round still waits on the hung query
        let replacement = harness.reregister(&NodeId::new("stale")).unwrap().unwrap();
        let late = harness.add_node(NodeSpec::new("late", -20)).unwrap();

        let report = round.await.unwrap().unwrap();
        assert_eq!(report.evicted(), vec![NodeId::new("stale")]);
        let population: Vec<&str> = report.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(population, vec!["server", "stale", "steady"]);
        assert_eq!(report.adjustment(&NodeId::new("steady")), Some(-15));

        let registry = harness.coordinator().registry();
        assert_eq!(
            registry.ids(),
            vec![NodeId::new("late"), NodeId::new("stale"), NodeId::new("steady")]
        );
        let replacement: RemoteHandle = replacement;
        assert!(same_handle(&registry.get(&NodeId::new("stale")).unwrap(), &replacement));
        assert_eq!(late.adjustments(), 0);
    }

    #[tokio::test]
    async fn test_registration_during_round_survives_eviction() {
        register_during_round(1).await;
    }

    #[tokio::test]
    async fn test_registration_during_concurrent_round_survives_eviction() {
        register_during_round(4).await;
    }

    async fn adjustments_with(max_concurrency: usize) -> Vec<(NodeId, Option<i64>, bool)> {
        let config = CoordinatorConfig {
            max_concurrency,
            ..config()
        };
        let mut specs: Vec<NodeSpec> = [120, -75, 33, -410, 9, 260]
            .iter()
            .enumerate()
            .map(|(i, &offset)| NodeSpec::new(format!("n{}", i), offset))
            .collect();
        specs.push(NodeSpec::new("stuck", 0).behavior(Behavior::Hang));

        let harness = SyncHarness::with_nodes(config, specs).unwrap();
        let report = harness.run_round().await.unwrap();
        report
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.adjustment_ms, n.evicted || n.failure.is_some()))
            .collect()
    }

    #[tokio::test]
    async fn test_concurrent_round_matches_sequential_round() {
        let sequential = adjustments_with(1).await;
        let concurrent = adjustments_with(4).await;
        assert_eq!(sequential, concurrent);
        assert_eq!(sequential.len(), 8);
        assert!(sequential
            .iter()
            .any(|(id, adjustment, failed)| id.as_str() == "stuck" && adjustment.is_none() && *failed));
    }

    #[tokio::test]
    async fn test_hung_node_leaves_self_only_round() {
        let harness = SyncHarness::with_nodes(
            config(),
            vec![NodeSpec::new("slow", 500).behavior(Behavior::Hang)],
        )
        .unwrap();

        let report = harness.run_round().await.unwrap();
        assert_eq!(report.average_skew_ms, 0.0);
        assert_eq!(report.adjustment(&NodeId::coordinator()), Some(0));
        assert_eq!(report.evicted(), vec![NodeId::new("slow")]);
        assert!(harness.coordinator().registry().is_empty());
    }

    #[tokio::test]
    async fn test_failed_node_is_absent_everywhere() {
        let harness = SyncHarness::with_nodes(
            config(),
            vec![
                NodeSpec::new("good", 30),
                NodeSpec::new("bad", 9_000).behavior(Behavior::FailQuery),
            ],
        )
        .unwrap();

        let report = harness.run_round().await.unwrap();
        let bad = harness.node(&NodeId::new("bad")).unwrap();
        assert_eq!(report.skew(&NodeId::new("bad")), None);
        assert_eq!(report.adjustment(&NodeId::new("bad")), None);
        assert_eq!(bad.adjustments(), 0);
        assert_eq!(bad.offset(), ClockOffset(9_000));
        assert!(!harness.coordinator().registry().contains(&NodeId::new("bad")));
        // Average over server and good only
        assert_eq!(report.adjustment(&NodeId::coordinator()), Some(15));
    }

    #[tokio::test]
    async fn test_evicted_node_can_rejoin() {
        let mut harness = SyncHarness::with_nodes(
            config(),
            vec![NodeSpec::new("flaky", 20).behavior(Behavior::FailQuery)],
        )
        .unwrap();
        harness.run_round().await.unwrap();
        assert!(harness.coordinator().registry().is_empty());

        harness.reregister(&NodeId::new("flaky")).unwrap();
        let report = harness.run_round().await.unwrap();
        assert_eq!(report.skew(&NodeId::new("flaky")), Some(20));
        assert_eq!(harness.spread_ms(), 0);
    }

    #[tokio::test]
    async fn test_reregistration_is_listed_once() {
        let mut harness =
            SyncHarness::with_nodes(config(), vec![NodeSpec::new("client1", 0)]).unwrap();
        harness.reregister(&NodeId::new("client1")).unwrap();
        harness.reregister(&NodeId::new("client1")).unwrap();

        assert_eq!(harness.coordinator().registry().ids(), vec![NodeId::new("client1")]);
        let report = harness.run_round().await.unwrap();
        assert_eq!(report.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_does_not_evict() {
        let harness = SyncHarness::with_nodes(
            config(),
            vec![NodeSpec::new("a", 10).behavior(Behavior::FailCheckpoint)],
        )
        .unwrap();

        let report = harness.run_round().await.unwrap();
        assert!(report.evicted().is_empty());
        assert!(harness.coordinator().registry().contains(&NodeId::new("a")));
    }

    #[tokio::test]
    async fn test_nodes_receive_new_reference() {
        let harness = SyncHarness::with_nodes(config(), vec![NodeSpec::new("a", 10)]).unwrap();
        let report = harness.run_round().await.unwrap();
        let a = harness.node(&NodeId::new("a")).unwrap();
        assert_eq!(a.last_checkpoint(), Some(report.new_time));
        assert_eq!(a.checkpoints(), 1);
    }

    #[tokio::test]
    async fn test_second_round_is_quiet() {
        let harness = SyncHarness::new(FleetConfig::standard().with_seed(7)).unwrap();
        harness.run_round().await.unwrap();
        let report = harness.run_round().await.unwrap();
        for node in &report.nodes {
            assert!(node.adjustment_ms.unwrap().abs() <= 1, "{:?}", node);
        }
    }

    #[tokio::test]
    async fn test_instant_fleet_converges_in_one_round() {
        let result = simulate(FleetConfig::minimal().with_seed(3), 1).await.unwrap();
        assert!(result.converged(1));
        assert_eq!(result.survivors, 2);
    }

    #[tokio::test]
    async fn test_stress_fleet_converges_despite_failures() {
        let result = simulate(FleetConfig::stress().with_seed(42), 3).await.unwrap();
        assert!(result.spread_before_ms > 1_000);
        assert_eq!(result.survivors + result.evicted.len(), 64);
        // Latency skews measurements by at most the slowest round trip plus
        // the time spent on earlier nodes; a few rounds settle it
        assert!(result.spread_after_ms < result.spread_before_ms);
    }

    #[tokio::test]
    async fn test_time_only_moves_with_latency() {
        let harness = SyncHarness::with_nodes(
            config(),
            vec![NodeSpec::new("a", 0).latency(Duration::from_millis(8))],
        )
        .unwrap();
        harness.run_round().await.unwrap();
        assert_eq!(harness.source().now(), Timestamp(10_008));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn run(offsets: &[i64]) -> (Arc<RoundReport>, i64) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let specs = offsets
                .iter()
                .enumerate()
                .map(|(i, &o)| NodeSpec::new(format!("n{}", i), o))
                .collect();
            let harness = SyncHarness::with_nodes(config(), specs).unwrap();
            let report = runtime.block_on(harness.run_round()).unwrap();
            (report, harness.spread_ms())
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_one_round_aligns_instant_nodes(offsets in proptest::collection::vec(-100_000i64..100_000, 0..12)) {
                let (report, spread) = run(&offsets);
                prop_assert!(spread <= 1);
                prop_assert_eq!(report.skew(&NodeId::coordinator()), Some(0));
            }

            #[test]
            fn prop_adjustments_sum_near_zero(offsets in proptest::collection::vec(-100_000i64..100_000, 0..12)) {
                let (report, _) = run(&offsets);
                let count = report.participants() as i64;
                prop_assert!(report.total_adjustment().abs() <= count / 2 + 1);
            }
        }
    }
}

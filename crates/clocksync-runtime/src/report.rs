//! Round reports
//!
//! A [`RoundReport`] is the only trace a round leaves behind. It renders as
//! a pair of tables for the shell, serializes to JSON, and logs one line per
//! node through `tracing`.

use std::fmt;

use serde::Serialize;

use clocksync_core::{NodeId, Timestamp};
use clocksync_time::fmt_millis;

use crate::Rounding;

/// What happened to one participant during a round
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeOutcome {
    pub id: NodeId,
    /// Time the node reported; `None` if the query failed
    pub reported: Option<Timestamp>,
    pub rtt_ms: Option<i64>,
    /// Reported time corrected by half the round trip
    pub adjusted: Option<Timestamp>,
    pub skew_ms: Option<i64>,
    /// Correction the node acknowledged
    pub adjustment_ms: Option<i64>,
    pub evicted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl NodeOutcome {
    pub(crate) fn failed(id: NodeId, failure: String) -> Self {
        NodeOutcome {
            id,
            reported: None,
            rtt_ms: None,
            adjusted: None,
            skew_ms: None,
            adjustment_ms: None,
            evicted: true,
            failure: Some(failure),
        }
    }

    /// Took part in the average and received its correction
    pub fn synchronized(&self) -> bool {
        !self.evicted && self.adjustment_ms.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoundReport {
    /// Round number since coordinator start, from 1
    pub round: u64,
    /// Coordinator time the skews are measured against
    pub reference: Timestamp,
    pub average_skew_ms: f64,
    pub rounding: Rounding,
    /// Coordinator time after its own correction
    pub new_time: Timestamp,
    /// Coordinator first, then registered nodes by id
    pub nodes: Vec<NodeOutcome>,
}

impl RoundReport {
    pub fn outcome(&self, id: &NodeId) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn adjustment(&self, id: &NodeId) -> Option<i64> {
        self.outcome(id).and_then(|n| n.adjustment_ms)
    }

    pub fn skew(&self, id: &NodeId) -> Option<i64> {
        self.outcome(id).and_then(|n| n.skew_ms)
    }

    /// Participants whose skew entered the average
    pub fn participants(&self) -> usize {
        self.nodes.iter().filter(|n| n.skew_ms.is_some()).count()
    }

    pub fn evicted(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.evicted)
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn total_adjustment(&self) -> i64 {
        self.nodes
            .iter()
            .filter_map(|n| n.adjustment_ms)
            .fold(0i64, i64::saturating_add)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// One `info!` per node plus the average, `warn!` per eviction
    pub fn log(&self) {
        for node in &self.nodes {
            match (&node.failure, node.skew_ms) {
                (Some(reason), _) => tracing::warn!(
                    round = self.round,
                    node = %node.id,
                    reason = %reason,
                    "Node evicted"
                ),
                (None, Some(skew)) => tracing::info!(
                    round = self.round,
                    node = %node.id,
                    reported = node.reported.map(Timestamp::as_millis),
                    rtt_ms = node.rtt_ms,
                    skew_ms = skew,
                    adjustment_ms = node.adjustment_ms,
                    "Node synchronized"
                ),
                (None, None) => {}
            }
        }
        tracing::info!(
            round = self.round,
            participants = self.participants(),
            average_skew_ms = format_args!("{:.2}", self.average_skew_ms),
            new_time = %fmt_millis(self.new_time),
            "Round complete"
        );
    }
}

fn opt<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn signed(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:+}", v))
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .nodes
            .iter()
            .map(|n| n.id.as_str().len())
            .max()
            .unwrap_or(0)
            .max(4);

        writeln!(
            f,
            "Round {} at {} ({} ms)",
            self.round,
            fmt_millis(self.reference),
            self.reference
        )?;
        writeln!(
            f,
            "  {:<width$}  {:>15}  {:>7}  {:>15}  {:>8}",
            "node", "reported", "rtt", "adjusted", "skew"
        )?;
        for node in &self.nodes {
            write!(
                f,
                "  {:<width$}  {:>15}  {:>7}  {:>15}  {:>8}",
                node.id,
                opt(node.reported),
                opt(node.rtt_ms),
                opt(node.adjusted),
                signed(node.skew_ms),
            )?;
            if node.skew_ms.is_none() {
                write!(f, "  evicted: {}", node.failure.as_deref().unwrap_or("unknown"))?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Average skew: {:+.2} ms", self.average_skew_ms)?;

        writeln!(f, "  {:<width$}  {:>10}", "node", "adjustment")?;
        for node in self.nodes.iter().filter(|n| n.skew_ms.is_some()) {
            write!(f, "  {:<width$}  {:>10}", node.id, signed(node.adjustment_ms))?;
            if node.evicted {
                write!(f, "  evicted: {}", node.failure.as_deref().unwrap_or("unknown"))?;
            }
            writeln!(f)?;
        }

        write!(f, "Coordinator time now {}", fmt_millis(self.new_time))
    }
}

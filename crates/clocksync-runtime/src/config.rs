//! Runtime configuration

use std::net::SocketAddr;
use std::time::Duration;

use clocksync_core::{ClockOffset, NodeId, SyncError, SyncResult};
use clocksync_transport::RpcConfig;

use crate::Rounding;

/// Well-known coordinator port
pub const DEFAULT_PORT: u16 = 1099;

/// Coordinator configuration
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Address the coordinator endpoint listens on
    pub bind: SocketAddr,
    /// Upper bound on each remote call made during a round
    pub call_timeout: Duration,
    /// Nodes polled at once during a round
    pub max_concurrency: usize,
    /// How fractional adjustments become whole milliseconds
    pub rounding: Rounding,
    /// Send each surviving node the new reference time after a round
    pub notify_checkpoints: bool,
    /// Run rounds on a timer in addition to explicit triggers
    pub sync_interval: Option<Duration>,
    /// Nodes to wait for before the first round
    pub expected_nodes: Vec<NodeId>,
    /// How long to wait for `expected_nodes`
    pub registration_wait: Duration,
    /// Registry poll period while waiting
    pub registration_poll: Duration,
    /// Run one round once the wait for `expected_nodes` ends
    pub initial_round: bool,
    /// Inbound request buffer
    pub inbound_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            call_timeout: Duration::from_secs(2),
            max_concurrency: 16,
            rounding: Rounding::Nearest,
            notify_checkpoints: true,
            sync_interval: None,
            expected_nodes: Vec::new(),
            registration_wait: Duration::from_secs(30),
            registration_poll: Duration::from_millis(500),
            initial_round: true,
            inbound_buffer: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> SyncResult<()> {
        if self.call_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("call_timeout must be positive".into()));
        }
        if self.max_concurrency == 0 {
            return Err(SyncError::InvalidConfig("max_concurrency must be at least 1".into()));
        }
        if self.sync_interval.is_some_and(|i| i.is_zero()) {
            return Err(SyncError::InvalidConfig("sync_interval must be positive".into()));
        }
        if self.registration_poll.is_zero() {
            return Err(SyncError::InvalidConfig("registration_poll must be positive".into()));
        }
        if let Some(bad) = self.expected_nodes.iter().find(|id| !id.is_valid()) {
            return Err(SyncError::InvalidNodeId(bad.clone()));
        }
        Ok(())
    }

    pub fn rpc(&self) -> RpcConfig {
        RpcConfig {
            call_timeout: self.call_timeout,
            inbound_buffer: self.inbound_buffer,
        }
    }
}

/// Clock node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Operator-chosen identity
    pub id: NodeId,
    /// Address the node endpoint listens on
    pub bind: SocketAddr,
    /// Coordinator's well-known address
    pub coordinator: SocketAddr,
    /// Address the coordinator should call back; source address when `None`
    pub advertise: Option<SocketAddr>,
    /// Simulated skew at startup
    pub initial_offset: ClockOffset,
    /// Upper bound on each call to the coordinator
    pub call_timeout: Duration,
    /// Registration attempts before giving up
    pub register_attempts: u32,
    /// First retry delay, doubled per attempt
    pub register_backoff: Duration,
    /// Ceiling for the retry delay
    pub register_backoff_max: Duration,
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>, coordinator: SocketAddr) -> Self {
        NodeConfig {
            id: id.into(),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            coordinator,
            advertise: None,
            initial_offset: ClockOffset::ZERO,
            call_timeout: Duration::from_secs(2),
            register_attempts: 5,
            register_backoff: Duration::from_millis(250),
            register_backoff_max: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        if !self.id.is_valid() {
            return Err(SyncError::InvalidNodeId(self.id.clone()));
        }
        if self.id.as_str() == NodeId::COORDINATOR {
            return Err(SyncError::InvalidConfig(format!(
                "{:?} is reserved for the coordinator",
                NodeId::COORDINATOR
            )));
        }
        if self.call_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("call_timeout must be positive".into()));
        }
        if self.register_attempts == 0 {
            return Err(SyncError::InvalidConfig("register_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn rpc(&self) -> RpcConfig {
        RpcConfig {
            call_timeout: self.call_timeout,
            ..Default::default()
        }
    }
}

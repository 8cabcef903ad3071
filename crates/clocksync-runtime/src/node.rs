//! Clock node process
//!
//! Registers with the coordinator once at startup, then answers whatever
//! the coordinator asks until shut down.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clocksync_core::{SyncError, SyncResult};
use clocksync_time::{fmt_millis, fmt_secs, ClockNode};
use clocksync_transport::{InboundReceiver, RemoteCoordinator, RpcEndpoint};

use crate::{NodeConfig, NodeService};

/// Request counters
#[derive(Debug, Default)]
pub struct NodeStats {
    pub requests: AtomicU64,
    pub refused: AtomicU64,
    pub reply_failures: AtomicU64,
}

impl NodeStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

pub struct NodeRuntime {
    config: NodeConfig,
    node: Arc<ClockNode>,
    endpoint: Arc<RpcEndpoint>,
    inbound: InboundReceiver,
    coordinator: RemoteCoordinator,
    stats: Arc<NodeStats>,
}

impl NodeRuntime {
    /// Node on the system clock, skewed by `config.initial_offset`
    pub async fn bind(config: NodeConfig) -> SyncResult<Self> {
        let node = ClockNode::system(config.id.clone(), config.initial_offset);
        Self::with_node(config, Arc::new(node)).await
    }

    pub async fn with_node(config: NodeConfig, node: Arc<ClockNode>) -> SyncResult<Self> {
        config.validate()?;
        let (endpoint, inbound) = RpcEndpoint::bind(config.bind, config.rpc()).await?;
        let coordinator = RemoteCoordinator::new(config.coordinator, endpoint.clone());

        tracing::info!(
            node = %node.id(),
            addr = %endpoint.local_addr(),
            offset_s = %fmt_secs(node.offset().as_millis()),
            local = %fmt_millis(node.now()),
            "Clock node started"
        );

        Ok(NodeRuntime {
            config,
            node,
            endpoint,
            inbound,
            coordinator,
            stats: Arc::new(NodeStats::default()),
        })
    }

    pub fn node(&self) -> &Arc<ClockNode> {
        &self.node
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn coordinator(&self) -> &RemoteCoordinator {
        &self.coordinator
    }

    pub fn stats(&self) -> Arc<NodeStats> {
        self.stats.clone()
    }

    /// Register with the coordinator, retrying transport failures with
    /// exponential backoff. Returns the number of attempts used.
    pub async fn register(&self) -> SyncResult<u32> {
        let mut delay = self.config.register_backoff;
        let mut attempt = 1;
        loop {
            match self
                .coordinator
                .register(self.node.id(), self.config.advertise)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        node = %self.node.id(),
                        coordinator = %self.coordinator.addr(),
                        attempt,
                        "Registered with coordinator"
                    );
                    return Ok(attempt);
                }
                Err(e) if retryable(&e) && attempt < self.config.register_attempts => {
                    tracing::warn!(attempt, retry_in = ?delay, "Registration failed: {}", e);
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay, self.config.register_backoff_max);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Answer requests until `shutdown` resolves
    pub async fn serve(mut self, shutdown: impl Future<Output = ()>) -> SyncResult<()> {
        let service = NodeService::new(self.node.clone());
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                inbound = self.inbound.recv() => {
                    let Some(inbound) = inbound else { break };
                    self.stats.requests.fetch_add(1, Ordering::Relaxed);
                    let response = service.handle(&inbound.request).await;
                    if matches!(response, clocksync_wire::Response::Unsupported { .. }) {
                        self.stats.refused.fetch_add(1, Ordering::Relaxed);
                    }
                    if let Err(e) = self.endpoint.respond(&inbound, &response).await {
                        self.stats.reply_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(peer = %inbound.from, "Failed to reply: {}", e);
                    }
                }
            }
        }
        tracing::info!(
            node = %self.node.id(),
            requests = self.stats.requests(),
            offset_ms = self.node.offset().as_millis(),
            "Clock node stopped"
        );
        Ok(())
    }

    /// Register, then serve
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> SyncResult<()> {
        self.register().await?;
        self.serve(shutdown).await
    }
}

fn retryable(e: &SyncError) -> bool {
    matches!(
        e,
        SyncError::Timeout { .. } | SyncError::Communication { .. } | SyncError::Transport(_)
    )
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

//! Real processes-in-miniature over loopback UDP
//!
//! A [`LoopbackCluster`] runs one coordinator server and any number of
//! clock node runtimes inside the current tokio runtime, all on 127.0.0.1.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use clocksync_core::{ClockOffset, NodeId, SyncError, SyncResult};
use clocksync_runtime::{Coordinator, CoordinatorConfig, CoordinatorServer, NodeConfig, NodeRuntime};
use clocksync_time::ClockNode;

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<SyncResult<()>>,
}

impl Running {
    async fn stop(self) -> SyncResult<()> {
        let _ = self.stop.send(());
        self.task
            .await
            .map_err(|e| SyncError::Transport(format!("task failed: {}", e)))?
    }
}

/// A node started by the cluster
pub struct LoopbackNode {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub clock: Arc<ClockNode>,
    running: Running,
}

impl LoopbackNode {
    /// Stop serving and release the socket
    pub async fn stop(self) -> SyncResult<()> {
        self.running.stop().await
    }
}

pub struct LoopbackCluster {
    coordinator: Coordinator,
    addr: SocketAddr,
    server: Running,
    call_timeout: Duration,
}

impl LoopbackCluster {
    pub async fn start(call_timeout: Duration) -> SyncResult<Self> {
        let config = CoordinatorConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            call_timeout,
            ..Default::default()
        };
        let server = CoordinatorServer::bind(config).await?;
        let coordinator = server.coordinator().clone();
        let addr = server.local_addr();

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(server.serve(async move {
            let _ = stopped.await;
        }));

        Ok(LoopbackCluster {
            coordinator,
            addr,
            server: Running { stop, task },
            call_timeout,
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Node config pointed at this cluster's coordinator
    pub fn node_config(&self, id: &str, offset: ClockOffset) -> NodeConfig {
        NodeConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            initial_offset: offset,
            call_timeout: self.call_timeout,
            register_backoff: Duration::from_millis(20),
            ..NodeConfig::new(id, self.addr)
        }
    }

    /// Start a node, register it and keep it serving
    pub async fn spawn_node(&self, id: &str, offset: ClockOffset) -> SyncResult<LoopbackNode> {
        let runtime = NodeRuntime::bind(self.node_config(id, offset)).await?;
        runtime.register().await?;

        let clock = runtime.node().clone();
        let addr = runtime.local_addr();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(runtime.serve(async move {
            let _ = stopped.await;
        }));

        Ok(LoopbackNode {
            id: NodeId::new(id),
            addr,
            clock,
            running: Running { stop, task },
        })
    }

    pub async fn shutdown(self) -> SyncResult<()> {
        self.server.stop().await
    }
}

//! Coordinator process
//!
//! Binds the well-known endpoint, answers registrations and triggers, and
//! optionally drives rounds on a timer.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use clocksync_core::SyncResult;
use clocksync_transport::{InboundReceiver, RpcEndpoint};

use crate::{ClientRegistry, Coordinator, CoordinatorConfig, CoordinatorService};

pub struct CoordinatorServer {
    service: Arc<CoordinatorService>,
    endpoint: Arc<RpcEndpoint>,
    inbound: InboundReceiver,
}

impl CoordinatorServer {
    /// Coordinator on the system clock with a fresh registry
    pub async fn bind(config: CoordinatorConfig) -> SyncResult<Self> {
        let coordinator = Coordinator::system(Arc::new(ClientRegistry::new()), config)?;
        Self::with_coordinator(coordinator).await
    }

    /// Serve an existing coordinator on its configured address
    pub async fn with_coordinator(coordinator: Coordinator) -> SyncResult<Self> {
        let config = coordinator.config();
        let (endpoint, inbound) = RpcEndpoint::bind(config.bind, config.rpc()).await?;
        tracing::info!(addr = %endpoint.local_addr(), id = %coordinator.id(), "Coordinator listening");

        let service = Arc::new(CoordinatorService::new(coordinator, endpoint.clone()));
        Ok(CoordinatorServer {
            service,
            endpoint,
            inbound,
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        self.service.coordinator()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Waits for the configured expected nodes in the background (then runs
    /// the initial round if enabled) and ticks `sync_interval` if set.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()>) -> SyncResult<()> {
        let coordinator = self.coordinator().clone();
        let config = coordinator.config().clone();

        let startup = (!config.expected_nodes.is_empty()).then(|| {
            let coordinator = coordinator.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let missing = coordinator
                    .await_registrations(
                        &config.expected_nodes,
                        config.registration_wait,
                        config.registration_poll,
                    )
                    .await;
                if !missing.is_empty() {
                    tracing::warn!(missing = missing.len(), "Starting without every expected node");
                }
                if config.initial_round {
                    if let Err(e) = coordinator.run_round().await {
                        tracing::error!("Initial round failed: {}", e);
                    }
                }
            })
        });

        let periodic = config.sync_interval.map(|period| {
            let coordinator = coordinator.clone();
            tracing::info!(period = %humantime::format_duration(period), "Periodic synchronization enabled");
            tokio::spawn(async move { coordinator.run_periodic(period).await })
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                inbound = self.inbound.recv() => {
                    let Some(inbound) = inbound else { break };
                    let service = self.service.clone();
                    let endpoint = self.endpoint.clone();
                    tokio::spawn(async move {
                        let response = service.handle(inbound.from, &inbound.request).await;
                        if let Err(e) = endpoint.respond(&inbound, &response).await {
                            tracing::warn!(peer = %inbound.from, "Failed to answer {}: {}", inbound.request.operation(), e);
                        }
                    });
                }
            }
        }

        for task in startup.into_iter().chain(periodic) {
            task.abort();
        }
        tracing::info!(rounds = coordinator.rounds_completed(), "Coordinator stopped");
        Ok(())
    }
}

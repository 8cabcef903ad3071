//! Network proxies for remote clock participants

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use clocksync_core::{NodeCapability, NodeId, SyncError, SyncResult, Timestamp};
use clocksync_wire::{Request, Response};

use crate::RpcEndpoint;

/// Turn a non-matching reply into the matching error
fn unexpected(peer: SocketAddr, request: &Request, expected: &'static str, got: Response) -> SyncError {
    match got {
        Response::Unsupported { role } => SyncError::unsupported(request.operation(), role),
        Response::Error { message, .. } => SyncError::Remote {
            peer: peer.to_string(),
            message,
        },
        other => SyncError::UnexpectedResponse {
            peer: peer.to_string(),
            expected,
            got: other.kind_name().to_string(),
        },
    }
}

async fn call_ack(endpoint: &RpcEndpoint, peer: SocketAddr, request: Request) -> SyncResult<()> {
    match endpoint.call(peer, &request).await? {
        Response::Ack => Ok(()),
        other => Err(unexpected(peer, &request, "ack", other)),
    }
}

async fn call_time(endpoint: &RpcEndpoint, peer: SocketAddr) -> SyncResult<Timestamp> {
    let request = Request::QueryTime;
    match endpoint.call(peer, &request).await? {
        Response::Time(t) => Ok(t),
        other => Err(unexpected(peer, &request, "time", other)),
    }
}

async fn call_identity(endpoint: &RpcEndpoint, peer: SocketAddr) -> SyncResult<NodeId> {
    let request = Request::Identity;
    match endpoint.call(peer, &request).await? {
        Response::Identity(id) => Ok(id),
        other => Err(unexpected(peer, &request, "identity", other)),
    }
}

/// Registered node reached through the coordinator's endpoint
pub struct RemoteNode {
    id: NodeId,
    addr: SocketAddr,
    endpoint: Arc<RpcEndpoint>,
}

impl RemoteNode {
    pub fn new(id: NodeId, addr: SocketAddr, endpoint: Arc<RpcEndpoint>) -> Self {
        RemoteNode { id, addr, endpoint }
    }

    /// Identity the node registered under
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}

#[async_trait]
impl NodeCapability for RemoteNode {
    async fn query_time(&self) -> SyncResult<Timestamp> {
        call_time(&self.endpoint, self.addr).await
    }

    async fn apply_adjustment(&self, delta_ms: i64) -> SyncResult<()> {
        call_ack(&self.endpoint, self.addr, Request::ApplyAdjustment { delta_ms }).await
    }

    async fn identity(&self) -> SyncResult<NodeId> {
        call_identity(&self.endpoint, self.addr).await
    }

    async fn is_reachable(&self) -> SyncResult<bool> {
        let request = Request::Ping;
        match self.endpoint.call(self.addr, &request).await? {
            Response::Pong { reachable } => Ok(reachable),
            other => Err(unexpected(self.addr, &request, "pong", other)),
        }
    }

    async fn notify_checkpoint(&self, reference: Timestamp) -> SyncResult<()> {
        call_ack(&self.endpoint, self.addr, Request::NotifyCheckpoint { reference }).await
    }
}

/// Coordinator reached from a node.
///
/// On the wire a node's handle is its endpoint address, so registration
/// carries the identity and an optional advertised address instead of a
/// handle object.
pub struct RemoteCoordinator {
    addr: SocketAddr,
    endpoint: Arc<RpcEndpoint>,
}

impl RemoteCoordinator {
    pub fn new(addr: SocketAddr, endpoint: Arc<RpcEndpoint>) -> Self {
        RemoteCoordinator { addr, endpoint }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register `id`, reachable at `advertise` or at this endpoint's
    /// source address when `None`
    pub async fn register(&self, id: &NodeId, advertise: Option<SocketAddr>) -> SyncResult<()> {
        let request = Request::Register {
            id: id.clone(),
            advertise,
        };
        call_ack(&self.endpoint, self.addr, request).await
    }

    pub async fn trigger_synchronization(&self) -> SyncResult<()> {
        call_ack(&self.endpoint, self.addr, Request::TriggerSync).await
    }

    pub async fn identity(&self) -> SyncResult<NodeId> {
        call_identity(&self.endpoint, self.addr).await
    }

    pub async fn query_time(&self) -> SyncResult<Timestamp> {
        call_time(&self.endpoint, self.addr).await
    }
}

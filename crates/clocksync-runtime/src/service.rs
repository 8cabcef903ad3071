//! Request dispatch per role
//!
//! Each role answers the operations it serves and replies
//! `Unsupported { role }` to the rest without touching any state.

use std::net::SocketAddr;
use std::sync::Arc;

use clocksync_core::{NodeCapability, NodeId, Role, SyncError};
use clocksync_transport::{RemoteNode, RpcEndpoint};
use clocksync_wire::{ErrorCode, Request, Response};

use crate::Coordinator;

fn failure(e: SyncError) -> Response {
    Response::error(ErrorCode::Internal, e.to_string())
}

/// Answer the operations every participant serves. Returns `None` for
/// coordinator-only requests.
pub async fn answer_node_request(node: &dyn NodeCapability, request: &Request) -> Option<Response> {
    let response = match request {
        Request::QueryTime => node.query_time().await.map(Response::Time),
        Request::ApplyAdjustment { delta_ms } => {
            node.apply_adjustment(*delta_ms).await.map(|_| Response::Ack)
        }
        Request::Identity => node.identity().await.map(Response::Identity),
        Request::Ping => node
            .is_reachable()
            .await
            .map(|reachable| Response::Pong { reachable }),
        Request::NotifyCheckpoint { reference } => {
            node.notify_checkpoint(*reference).await.map(|_| Response::Ack)
        }
        Request::Register { .. } | Request::TriggerSync => return None,
    };
    Some(response.unwrap_or_else(failure))
}

/// Requests reaching a clock node
pub struct NodeService {
    node: Arc<dyn NodeCapability>,
}

impl NodeService {
    pub fn new(node: Arc<dyn NodeCapability>) -> Self {
        NodeService { node }
    }

    pub async fn handle(&self, request: &Request) -> Response {
        match answer_node_request(self.node.as_ref(), request).await {
            Some(response) => response,
            None => {
                tracing::debug!(op = request.operation(), "Refusing coordinator operation");
                Response::Unsupported { role: Role::Node }
            }
        }
    }
}

/// Requests reaching the coordinator
pub struct CoordinatorService {
    coordinator: Coordinator,
    endpoint: Arc<RpcEndpoint>,
}

impl CoordinatorService {
    /// `endpoint` is the one registered nodes are called back through
    pub fn new(coordinator: Coordinator, endpoint: Arc<RpcEndpoint>) -> Self {
        CoordinatorService {
            coordinator,
            endpoint,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub async fn handle(&self, from: SocketAddr, request: &Request) -> Response {
        match request {
            Request::Register { id, advertise } => self.register(from, id, *advertise),
            Request::TriggerSync => {
                tracing::info!(peer = %from, "Synchronization requested");
                drop(self.coordinator.trigger());
                Response::Ack
            }
            // Checkpoints flow from the coordinator, never to it
            Request::NotifyCheckpoint { .. } => Response::Unsupported {
                role: Role::Coordinator,
            },
            other => {
                let node = self.coordinator.node().as_ref();
                answer_node_request(node, other)
                    .await
                    .unwrap_or_else(|| failure(SyncError::unsupported(other.operation(), Role::Coordinator)))
            }
        }
    }

    fn register(&self, from: SocketAddr, id: &NodeId, advertise: Option<SocketAddr>) -> Response {
        let addr = callback_addr(from, advertise);
        let handle = Arc::new(RemoteNode::new(id.clone(), addr, self.endpoint.clone()));
        match self.coordinator.register_node(id.clone(), handle) {
            Ok(_) => {
                tracing::debug!(node = %id, %addr, "Callback address recorded");
                Response::Ack
            }
            Err(e) => {
                tracing::warn!(peer = %from, node = %id, "Registration rejected: {}", e);
                Response::error(ErrorCode::Malformed, e.to_string())
            }
        }
    }
}

/// Where to reach a registering node. An unspecified advertised host means
/// the datagram's source host; port 0 means the source port.
pub fn callback_addr(from: SocketAddr, advertise: Option<SocketAddr>) -> SocketAddr {
    match advertise {
        None => from,
        Some(addr) if addr.ip().is_unspecified() && addr.port() == 0 => from,
        Some(addr) if addr.ip().is_unspecified() => SocketAddr::new(from.ip(), addr.port()),
        Some(addr) => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientRegistry, CoordinatorConfig};
    use clocksync_core::{ClockOffset, Timestamp};
    use clocksync_time::{ClockNode, ManualTimeSource};
    use clocksync_transport::RpcConfig;

    fn clock(id: &str, offset: i64) -> Arc<ClockNode> {
        let source = Arc::new(ManualTimeSource::new(Timestamp(10_000)));
        Arc::new(ClockNode::with_source(NodeId::new(id), source, ClockOffset(offset)))
    }

    async fn coordinator_service() -> CoordinatorService {
        let coordinator = Coordinator::new(
            clock("server", 0),
            Arc::new(ClientRegistry::new()),
            CoordinatorConfig::default(),
        )
        .unwrap();
        let (endpoint, _rx) = RpcEndpoint::bind("127.0.0.1:0".parse().unwrap(), RpcConfig::default())
            .await
            .unwrap();
        CoordinatorService::new(coordinator, endpoint)
    }

    #[tokio::test]
    async fn test_node_serves_its_operations() {
        let service = NodeService::new(clock("a", 50));
        assert_eq!(service.handle(&Request::QueryTime).await, Response::Time(Timestamp(10_050)));
        assert_eq!(
            service.handle(&Request::ApplyAdjustment { delta_ms: -47 }).await,
            Response::Ack
        );
        assert_eq!(service.handle(&Request::QueryTime).await, Response::Time(Timestamp(10_003)));
        assert_eq!(
            service.handle(&Request::Identity).await,
            Response::Identity(NodeId::new("a"))
        );
    }

    #[tokio::test]
    async fn test_node_refuses_coordinator_operations() {
        let service = NodeService::new(clock("a", 0));
        let register = Request::Register {
            id: NodeId::new("b"),
            advertise: None,
        };
        assert_eq!(
            service.handle(&register).await,
            Response::Unsupported { role: Role::Node }
        );
        assert_eq!(
            service.handle(&Request::TriggerSync).await,
            Response::Unsupported { role: Role::Node }
        );
    }

    #[tokio::test]
    async fn test_register_uses_source_address() {
        let service = coordinator_service().await;
        let from: SocketAddr = "10.0.0.7:4000".parse().unwrap();
        let request = Request::Register {
            id: NodeId::new("client1"),
            advertise: None,
        };
        assert_eq!(service.handle(from, &request).await, Response::Ack);
        assert_eq!(service.handle(from, &request).await, Response::Ack);
        assert_eq!(service.coordinator().registry().ids(), vec![NodeId::new("client1")]);
    }

    #[tokio::test]
    async fn test_register_rejects_reserved_identity() {
        let service = coordinator_service().await;
        let request = Request::Register {
            id: NodeId::coordinator(),
            advertise: None,
        };
        let response = service.handle("10.0.0.7:4000".parse().unwrap(), &request).await;
        assert!(matches!(response, Response::Error { code: ErrorCode::Malformed, .. }));
        assert!(service.coordinator().registry().is_empty());
    }

    #[tokio::test]
    async fn test_coordinator_refuses_checkpoint() {
        let service = coordinator_service().await;
        let request = Request::NotifyCheckpoint {
            reference: Timestamp(1),
        };
        assert_eq!(
            service.handle("10.0.0.7:4000".parse().unwrap(), &request).await,
            Response::Unsupported {
                role: Role::Coordinator
            }
        );
    }

    #[test]
    fn test_callback_addr() {
        let from: SocketAddr = "10.0.0.7:4000".parse().unwrap();
        assert_eq!(callback_addr(from, None), from);
        assert_eq!(callback_addr(from, Some("0.0.0.0:0".parse().unwrap())), from);
        assert_eq!(
            callback_addr(from, Some("0.0.0.0:5000".parse().unwrap())),
            "10.0.0.7:5000".parse().unwrap()
        );
        assert_eq!(
            callback_addr(from, Some("192.168.1.2:5000".parse().unwrap())),
            "192.168.1.2:5000".parse().unwrap()
        );
    }
}

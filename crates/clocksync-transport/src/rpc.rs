//! Request/response endpoint over a single UDP socket
//!
//! One endpoint both issues calls (correlated by request id) and receives
//! inbound requests, which are handed to the owner through a channel. The
//! owner answers them with [`RpcEndpoint::respond`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use clocksync_core::{SyncError, SyncResult};
use clocksync_wire::{ErrorCode, Frame, FrameKind, Request, Response, MAX_FRAME_SIZE};

use crate::UdpTransport;

/// Endpoint configuration
#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// Upper bound on every outbound call
    pub call_timeout: Duration,
    /// Inbound requests buffered before the endpoint answers "busy"
    pub inbound_buffer: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            call_timeout: Duration::from_secs(2),
            inbound_buffer: 256,
        }
    }
}

/// A decoded request waiting for an answer
#[derive(Clone, Debug)]
pub struct InboundRequest {
    pub from: SocketAddr,
    pub request_id: u64,
    pub request: Request,
}

/// Inbound request channel
pub type InboundReceiver = mpsc::Receiver<InboundRequest>;

struct PendingCall {
    dest: SocketAddr,
    reply: oneshot::Sender<Response>,
}

type PendingMap = Mutex<HashMap<u64, PendingCall>>;

/// Clears a pending slot however the call ends, including when the caller
/// drops the call future under its own timeout
struct PendingSlot<'a> {
    pending: &'a PendingMap,
    request_id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.request_id);
    }
}

/// UDP request/response endpoint
pub struct RpcEndpoint {
    transport: UdpTransport,
    pending: PendingMap,
    next_id: AtomicU64,
    config: RpcConfig,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcEndpoint {
    /// Bind and start the receive loop
    pub async fn bind(
        addr: SocketAddr,
        config: RpcConfig,
    ) -> SyncResult<(Arc<Self>, InboundReceiver)> {
        let transport = UdpTransport::bind(addr).await?;
        let socket = transport.socket();
        let (tx, rx) = mpsc::channel(config.inbound_buffer.max(1));

        let endpoint = Arc::new(RpcEndpoint {
            transport,
            pending: Mutex::new(HashMap::new()),
            // Random start so a restarted peer never matches stale replies
            next_id: AtomicU64::new(rand::random::<u64>() >> 1),
            config,
            recv_task: Mutex::new(None),
        });

        let task = tokio::spawn(receive_loop(socket, Arc::downgrade(&endpoint), tx));
        *endpoint.recv_task.lock() = Some(task);

        tracing::debug!(addr = %endpoint.local_addr(), "RPC endpoint bound");
        Ok((endpoint, rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Calls still waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send `request` to `dest` and wait for the reply, bounded by the
    /// configured call timeout
    pub async fn call(&self, dest: SocketAddr, request: &Request) -> SyncResult<Response> {
        self.call_with_timeout(dest, request, self.config.call_timeout)
            .await
    }

    pub async fn call_with_timeout(
        &self,
        dest: SocketAddr,
        request: &Request,
        timeout: Duration,
    ) -> SyncResult<Response> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(request_id, PendingCall { dest, reply });
        let _slot = PendingSlot {
            pending: &self.pending,
            request_id,
        };

        let frame = Frame::request(request_id, request);
        if let Err(e) = self.transport.send_to(&frame, dest).await {
            return Err(SyncError::Communication {
                peer: dest.to_string(),
                reason: e.to_string(),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SyncError::EndpointClosed),
            Err(_) => {
                tracing::debug!(peer = %dest, op = request.operation(), ?timeout, "Call timed out");
                Err(SyncError::Timeout {
                    peer: dest.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Answer an inbound request
    pub async fn respond(&self, inbound: &InboundRequest, response: &Response) -> SyncResult<()> {
        let frame = Frame::response(inbound.request_id, response);
        self.transport.send_to(&frame, inbound.from).await
    }

    async fn reply_to(&self, from: SocketAddr, request_id: u64, response: &Response) {
        let frame = Frame::response(request_id, response);
        if let Err(e) = self.transport.send_to(&frame, from).await {
            tracing::warn!(peer = %from, "Failed to send reply: {}", e);
        }
    }

    fn complete(&self, from: SocketAddr, request_id: u64, response: Response) {
        let mut pending = self.pending.lock();
        let matches = match pending.get(&request_id) {
            Some(call) => source_matches(call.dest, from),
            None => {
                tracing::debug!(peer = %from, request_id, "Late or unknown reply dropped");
                return;
            }
        };
        if !matches {
            tracing::warn!(peer = %from, request_id, "Reply from unexpected source dropped");
            return;
        }
        if let Some(call) = pending.remove(&request_id) {
            // Caller may have given up already
            let _ = call.reply.send(response);
        }
    }
}

impl Drop for RpcEndpoint {
    fn drop(&mut self) {
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }
    }
}

/// Replies to a wildcard destination may come from any local interface
fn source_matches(dest: SocketAddr, from: SocketAddr) -> bool {
    if dest.ip().is_unspecified() {
        dest.port() == from.port()
    } else {
        dest == from
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    endpoint: Weak<RpcEndpoint>,
    inbound: mpsc::Sender<InboundRequest>,
) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("UDP receive error: {}", e);
                continue;
            }
        };

        let Some(endpoint) = endpoint.upgrade() else {
            break;
        };

        let frame = match Frame::parse(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(peer = %from, "Dropping unparseable datagram: {}", e);
                continue;
            }
        };

        match frame.kind() {
            FrameKind::Response => match frame.decode_response() {
                Ok(response) => endpoint.complete(from, frame.request_id(), response),
                Err(e) => tracing::warn!(peer = %from, "Malformed reply: {}", e),
            },
            FrameKind::Request => {
                let request = match frame.decode_request() {
                    Ok(request) => request,
                    Err(e) => {
                        let reply = Response::error(ErrorCode::Malformed, e.to_string());
                        endpoint.reply_to(from, frame.request_id(), &reply).await;
                        continue;
                    }
                };

                let request_id = frame.request_id();
                let item = InboundRequest {
                    from,
                    request_id,
                    request,
                };
                if let Err(e) = inbound.try_send(item) {
                    let reason = match e {
                        mpsc::error::TrySendError::Full(_) => "endpoint busy",
                        mpsc::error::TrySendError::Closed(_) => "endpoint does not serve requests",
                    };
                    let reply = Response::error(ErrorCode::Internal, reason);
                    endpoint.reply_to(from, request_id, &reply).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clocksync_core::Timestamp;

    async fn endpoint(timeout_ms: u64) -> (Arc<RpcEndpoint>, InboundReceiver) {
        let config = RpcConfig {
            call_timeout: Duration::from_millis(timeout_ms),
            ..Default::default()
        };
        RpcEndpoint::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_call_and_respond() {
        let (client, _client_rx) = endpoint(1_000).await;
        let (server, mut server_rx) = endpoint(1_000).await;

        let server_task = {
            let server = server.clone();
            tokio::spawn(async move {
                let inbound = server_rx.recv().await.unwrap();
                assert_eq!(inbound.request, Request::QueryTime);
                server
                    .respond(&inbound, &Response::Time(Timestamp(10_050)))
                    .await
                    .unwrap();
            })
        };

        let response = client.call(server.local_addr(), &Request::QueryTime).await.unwrap();
        assert_eq!(response, Response::Time(Timestamp(10_050)));
        assert_eq!(client.pending_calls(), 0);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_call_times_out_and_clears_pending() {
        let (client, _client_rx) = endpoint(50).await;
        // Bound but never answers
        let (silent, _silent_rx) = endpoint(50).await;

        let result = client.call(silent.local_addr(), &Request::Ping).await;
        assert!(matches!(result, Err(SyncError::Timeout { .. })));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_call_clears_pending() {
        let (client, _client_rx) = endpoint(1_000).await;
        let (silent, _silent_rx) = endpoint(1_000).await;

        // The caller gives up long before the endpoint's own timeout
        let call = client.call(silent.local_addr(), &Request::QueryTime);
        let abandoned = tokio::time::timeout(Duration::from_millis(20), call).await;
        assert!(abandoned.is_err());
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_request_to_non_serving_endpoint_gets_error() {
        let (client, _client_rx) = endpoint(1_000).await;
        let (other, other_rx) = endpoint(1_000).await;
        drop(other_rx);

        let response = client.call(other.local_addr(), &Request::Ping).await.unwrap();
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::Internal,
                ..
            }
        ));
    }

    #[test]
    fn test_source_matching() {
        let wildcard: SocketAddr = "0.0.0.0:1099".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:1099".parse().unwrap();
        let other: SocketAddr = "127.0.0.1:2000".parse().unwrap();

        assert!(source_matches(wildcard, local));
        assert!(source_matches(local, local));
        assert!(!source_matches(local, other));
        assert!(!source_matches(wildcard, other));
    }
}

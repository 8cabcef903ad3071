//! UDP transport implementation

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use clocksync_core::{SyncError, SyncResult};
use clocksync_wire::Frame;

/// UDP transport for clocksync
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> SyncResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| SyncError::Transport(format!("bind {}: {}", addr, e)))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send a frame to a destination
    pub async fn send_to(&self, frame: &Frame, dest: SocketAddr) -> SyncResult<()> {
        let bytes = frame.serialize()?;
        self.socket
            .send_to(&bytes, dest)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(())
    }

    /// Get a clone of the socket for concurrent operations
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

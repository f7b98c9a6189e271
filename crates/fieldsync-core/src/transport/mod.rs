//! Transport abstraction for peer discovery, connections and payload delivery.
//!
//! Implementations report everything that happens on the network as
//! [`TransportEvent`]s on an unbounded channel handed out at construction, so
//! the transport's own delivery context never blocks on engine work.
//!
//! - [`MemoryTransport`] runs peers inside one process (tests, simulations)
//! - [`TcpTransport`] connects devices on a LAN with length-prefixed frames

mod memory;
mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Transport-assigned identifier of a remote endpoint
pub type PeerId = String;

/// Outcome of a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Ok,
    Rejected,
    Error(String),
}

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A device advertising the same service became visible
    EndpointFound { peer_id: PeerId, name: String },
    EndpointLost { peer_id: PeerId },
    /// A connection to or from `peer_id` is waiting to be accepted or rejected
    ConnectionInitiated { peer_id: PeerId, name: String },
    ConnectionResult {
        peer_id: PeerId,
        status: ConnectionStatus,
    },
    Disconnected { peer_id: PeerId },
    PayloadReceived { peer_id: PeerId, payload: Bytes },
    PayloadProgress {
        peer_id: PeerId,
        bytes_transferred: u64,
        total_bytes: u64,
    },
}

/// Receiving half of a transport's event stream
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Peer-to-peer transport used by the sync session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name this device presents to peers
    fn local_name(&self) -> &str;

    async fn start_advertising(&self, service_id: &str) -> Result<()>;

    async fn stop_advertising(&self);

    async fn start_discovery(&self, service_id: &str) -> Result<()>;

    async fn stop_discovery(&self);

    /// Ask a discovered endpoint for a connection
    async fn request_connection(&self, peer_id: &str) -> Result<()>;

    async fn accept_connection(&self, peer_id: &str) -> Result<()>;

    async fn reject_connection(&self, peer_id: &str) -> Result<()>;

    /// Deliver one payload to a connected peer
    async fn send_payload(&self, peer_id: &str, payload: Bytes) -> Result<()>;

    async fn disconnect(&self, peer_id: &str);

    async fn disconnect_all(&self);
}

//! In-process transport
//!
//! Every [`MemoryTransport`] joined to the same [`MemoryNetwork`] can see and
//! connect to the others. Both sides must accept before a connection is
//! established, and advertise/discovery failures can be injected to exercise
//! retry handling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConnectionStatus, PeerId, Transport, TransportEvent, TransportEvents};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Node {
    events: mpsc::UnboundedSender<TransportEvent>,
    advertising: Option<String>,
    discovering: Option<String>,
    fail_advertise: u32,
    fail_discovery: u32,
}

#[derive(Debug, Default)]
struct NetworkState {
    nodes: HashMap<PeerId, Node>,
    /// Pending connections and the sides that already accepted
    pending: HashMap<(PeerId, PeerId), HashSet<PeerId>>,
    connections: HashSet<(PeerId, PeerId)>,
}

fn pair_key(a: &str, b: &str) -> (PeerId, PeerId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl NetworkState {
    fn notify(&self, node: &str, event: TransportEvent) {
        if let Some(entry) = self.nodes.get(node) {
            let _ = entry.events.send(event);
        }
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| Error::Transport(format!("{name} left the network")))
    }
}

/// Shared in-process network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device to the network.
    pub fn join(&self, name: impl Into<String>) -> (MemoryTransport, TransportEvents) {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().nodes.insert(
            name.clone(),
            Node {
                events: tx,
                advertising: None,
                discovering: None,
                fail_advertise: 0,
                fail_discovery: 0,
            },
        );
        (
            MemoryTransport {
                name,
                state: Arc::clone(&self.state),
            },
            rx,
        )
    }

    /// Make the next `times` advertise attempts of `name` fail.
    pub fn fail_next_advertise(&self, name: &str, times: u32) {
        if let Some(node) = self.state.lock().nodes.get_mut(name) {
            node.fail_advertise = times;
        }
    }

    /// Make the next `times` discovery attempts of `name` fail.
    pub fn fail_next_discovery(&self, name: &str, times: u32) {
        if let Some(node) = self.state.lock().nodes.get_mut(name) {
            node.fail_discovery = times;
        }
    }

    /// Whether two devices currently share an established connection.
    pub fn is_connected(&self, a: &str, b: &str) -> bool {
        self.state.lock().connections.contains(&pair_key(a, b))
    }
}

/// One device's handle on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    name: String,
    state: Arc<Mutex<NetworkState>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_name(&self) -> &str {
        &self.name
    }

    async fn start_advertising(&self, service_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let node = state.node_mut(&self.name)?;
        if node.fail_advertise > 0 {
            node.fail_advertise -= 1;
            return Err(Error::Transport("advertising unavailable".to_string()));
        }
        node.advertising = Some(service_id.to_string());

        let watchers: Vec<PeerId> = state
            .nodes
            .iter()
            .filter(|(name, node)| {
                *name != &self.name && node.discovering.as_deref() == Some(service_id)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for watcher in watchers {
            state.notify(
                &watcher,
                TransportEvent::EndpointFound {
                    peer_id: self.name.clone(),
                    name: self.name.clone(),
                },
            );
        }
        Ok(())
    }

    async fn stop_advertising(&self) {
        let mut state = self.state.lock();
        let watchers: Vec<PeerId> = state
            .nodes
            .iter()
            .filter(|(name, node)| *name != &self.name && node.discovering.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        if let Some(node) = state.nodes.get_mut(&self.name) {
            node.advertising = None;
        }
        for watcher in watchers {
            state.notify(
                &watcher,
                TransportEvent::EndpointLost {
                    peer_id: self.name.clone(),
                },
            );
        }
    }

    async fn start_discovery(&self, service_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let node = state.node_mut(&self.name)?;
        if node.fail_discovery > 0 {
            node.fail_discovery -= 1;
            return Err(Error::Transport("discovery unavailable".to_string()));
        }
        node.discovering = Some(service_id.to_string());

        let visible: Vec<PeerId> = state
            .nodes
            .iter()
            .filter(|(name, node)| {
                *name != &self.name && node.advertising.as_deref() == Some(service_id)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for peer in visible {
            state.notify(
                &self.name,
                TransportEvent::EndpointFound {
                    peer_id: peer.clone(),
                    name: peer,
                },
            );
        }
        Ok(())
    }

    async fn stop_discovery(&self) {
        if let Some(node) = self.state.lock().nodes.get_mut(&self.name) {
            node.discovering = None;
        }
    }

    async fn request_connection(&self, peer_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let reachable = state
            .nodes
            .get(peer_id)
            .is_some_and(|node| node.advertising.is_some());
        if !reachable {
            return Err(Error::Transport(format!("{peer_id} is not advertising")));
        }
        let key = pair_key(&self.name, peer_id);
        if state.connections.contains(&key) || state.pending.contains_key(&key) {
            return Err(Error::Transport(format!(
                "connection to {peer_id} already exists"
            )));
        }
        state.pending.insert(key, HashSet::new());
        state.notify(
            &self.name,
            TransportEvent::ConnectionInitiated {
                peer_id: peer_id.to_string(),
                name: peer_id.to_string(),
            },
        );
        state.notify(
            peer_id,
            TransportEvent::ConnectionInitiated {
                peer_id: self.name.clone(),
                name: self.name.clone(),
            },
        );
        Ok(())
    }

    async fn accept_connection(&self, peer_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let key = pair_key(&self.name, peer_id);
        let accepted = state
            .pending
            .get_mut(&key)
            .ok_or_else(|| Error::Transport(format!("no pending connection with {peer_id}")))?;
        accepted.insert(self.name.clone());
        if accepted.len() < 2 {
            return Ok(());
        }

        state.pending.remove(&key);
        state.connections.insert(key);
        state.notify(
            &self.name,
            TransportEvent::ConnectionResult {
                peer_id: peer_id.to_string(),
                status: ConnectionStatus::Ok,
            },
        );
        state.notify(
            peer_id,
            TransportEvent::ConnectionResult {
                peer_id: self.name.clone(),
                status: ConnectionStatus::Ok,
            },
        );
        Ok(())
    }

    async fn reject_connection(&self, peer_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.pending.remove(&pair_key(&self.name, peer_id)).is_none() {
            return Err(Error::Transport(format!(
                "no pending connection with {peer_id}"
            )));
        }
        state.notify(
            &self.name,
            TransportEvent::ConnectionResult {
                peer_id: peer_id.to_string(),
                status: ConnectionStatus::Rejected,
            },
        );
        state.notify(
            peer_id,
            TransportEvent::ConnectionResult {
                peer_id: self.name.clone(),
                status: ConnectionStatus::Rejected,
            },
        );
        Ok(())
    }

    async fn send_payload(&self, peer_id: &str, payload: Bytes) -> Result<()> {
        let state = self.state.lock();
        if !state.connections.contains(&pair_key(&self.name, peer_id)) {
            return Err(Error::Transport(format!("not connected to {peer_id}")));
        }
        let total_bytes = payload.len() as u64;
        state.notify(
            peer_id,
            TransportEvent::PayloadReceived {
                peer_id: self.name.clone(),
                payload,
            },
        );
        state.notify(
            &self.name,
            TransportEvent::PayloadProgress {
                peer_id: peer_id.to_string(),
                bytes_transferred: total_bytes,
                total_bytes,
            },
        );
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) {
        let mut state = self.state.lock();
        let key = pair_key(&self.name, peer_id);
        state.pending.remove(&key);
        if state.connections.remove(&key) {
            state.notify(
                peer_id,
                TransportEvent::Disconnected {
                    peer_id: self.name.clone(),
                },
            );
        }
    }

    async fn disconnect_all(&self) {
        let peers: Vec<PeerId> = {
            let state = self.state.lock();
            state
                .connections
                .iter()
                .chain(state.pending.keys())
                .filter_map(|(a, b)| {
                    if a == &self.name {
                        Some(b.clone())
                    } else if b == &self.name {
                        Some(a.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };
        for peer in peers {
            self.disconnect(&peer).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SERVICE: &str = "fieldsync.test";

    fn drain(rx: &mut TransportEvents) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn discovery_sees_advertisers_in_either_order() {
        let network = MemoryNetwork::new();
        let (a, mut a_rx) = network.join("a");
        let (b, mut b_rx) = network.join("b");

        a.start_discovery(SERVICE).await.unwrap();
        b.start_advertising(SERVICE).await.unwrap();
        b.start_discovery(SERVICE).await.unwrap();
        a.start_advertising(SERVICE).await.unwrap();

        let found = TransportEvent::EndpointFound {
            peer_id: "b".to_string(),
            name: "b".to_string(),
        };
        assert_eq!(drain(&mut a_rx), vec![found]);
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[tokio::test]
    async fn connection_needs_both_sides_to_accept() {
        let network = MemoryNetwork::new();
        let (a, mut a_rx) = network.join("a");
        let (b, mut b_rx) = network.join("b");
        b.start_advertising(SERVICE).await.unwrap();

        a.request_connection("b").await.unwrap();
        a.accept_connection("b").await.unwrap();
        assert!(!network.is_connected("a", "b"));

        b.accept_connection("a").await.unwrap();
        assert!(network.is_connected("a", "b"));

        let a_events = drain(&mut a_rx);
        assert!(a_events.contains(&TransportEvent::ConnectionResult {
            peer_id: "b".to_string(),
            status: ConnectionStatus::Ok,
        }));
        assert!(drain(&mut b_rx).contains(&TransportEvent::ConnectionResult {
            peer_id: "a".to_string(),
            status: ConnectionStatus::Ok,
        }));
    }

    #[tokio::test]
    async fn payloads_only_flow_over_connections() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.join("a");
        let (b, mut b_rx) = network.join("b");
        assert!(a.send_payload("b", Bytes::from_static(b"hi")).await.is_err());

        b.start_advertising(SERVICE).await.unwrap();
        a.request_connection("b").await.unwrap();
        a.accept_connection("b").await.unwrap();
        b.accept_connection("a").await.unwrap();
        drain(&mut b_rx);

        a.send_payload("b", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(
            drain(&mut b_rx),
            vec![TransportEvent::PayloadReceived {
                peer_id: "a".to_string(),
                payload: Bytes::from_static(b"hi"),
            }]
        );

        a.disconnect_all().await;
        assert_eq!(
            drain(&mut b_rx),
            vec![TransportEvent::Disconnected {
                peer_id: "a".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let network = MemoryNetwork::new();
        let (a, _rx) = network.join("a");
        network.fail_next_advertise("a", 2);
        assert!(a.start_advertising(SERVICE).await.is_err());
        assert!(a.start_advertising(SERVICE).await.is_err());
        assert!(a.start_advertising(SERVICE).await.is_ok());
    }
}

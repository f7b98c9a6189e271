//! Peer session state machine
//!
//! One explicit session object tracks the single active peer. Every transport
//! event passes through it and it tells the engine what to do next.

use serde::{Deserialize, Serialize};

use crate::events::SessionStatus;
use crate::transport::PeerId;

/// Lifecycle of the peer connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Advertising,
    Discovering,
    Connecting,
    Connected,
    Disconnected,
}

/// Mutable state of the current peer session.
#[derive(Debug, Default)]
pub struct PeerSession {
    state: SessionState,
    advertising: bool,
    discovering: bool,
    connecting_to: Option<PeerId>,
    active_peer: Option<PeerId>,
    last_error: Option<String>,
    /// Bumped on every established connection so delayed work can detect staleness
    generation: u64,
    files_received: u32,
    /// File count the remote announced for this session
    files_expected: u32,
    received_complete: bool,
    served: bool,
}

impl PeerSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.active_peer.as_deref()
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            is_advertising: self.advertising,
            is_discovering: self.discovering,
            connected_devices: self.active_peer.iter().cloned().collect(),
            error: self.last_error.clone(),
        }
    }

    fn settle_idle_state(&mut self) {
        if self.active_peer.is_some() || self.connecting_to.is_some() {
            return;
        }
        self.state = if self.discovering {
            SessionState::Discovering
        } else if self.advertising {
            SessionState::Advertising
        } else if self.state == SessionState::Disconnected {
            SessionState::Disconnected
        } else {
            SessionState::Idle
        };
    }

    pub fn set_advertising(&mut self, advertising: bool) {
        self.advertising = advertising;
        if advertising {
            self.last_error = None;
        }
        self.settle_idle_state();
    }

    pub fn set_discovering(&mut self, discovering: bool) {
        self.discovering = discovering;
        if discovering {
            self.last_error = None;
        }
        self.settle_idle_state();
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// A peer became visible. Returns `true` when a connection should be requested.
    pub fn on_endpoint_found(&mut self, peer_id: &str) -> bool {
        if self.active_peer.is_some() || self.connecting_to.is_some() {
            tracing::debug!(peer = %peer_id, "Connection already in progress, skipping");
            return false;
        }
        self.connecting_to = Some(peer_id.to_string());
        self.state = SessionState::Connecting;
        true
    }

    pub fn on_endpoint_lost(&mut self, peer_id: &str) {
        if self.connecting_to.as_deref() == Some(peer_id) {
            self.connecting_to = None;
            self.settle_idle_state();
        }
    }

    /// A connection request was not sent after all.
    pub fn on_request_failed(&mut self, peer_id: &str, error: &str) {
        if self.connecting_to.as_deref() == Some(peer_id) {
            self.connecting_to = None;
        }
        self.last_error = Some(error.to_string());
        self.settle_idle_state();
    }

    /// Incoming or outgoing connection awaiting acceptance; always accepted.
    pub fn on_connection_initiated(&mut self, peer_id: &str) {
        if self.active_peer.is_none() {
            if self.connecting_to.is_none() {
                self.connecting_to = Some(peer_id.to_string());
            }
            self.state = SessionState::Connecting;
        }
    }

    /// Connection established. Returns the new session generation, or `None`
    /// when another peer is already active and this one must be dropped.
    pub fn on_connected(&mut self, peer_id: &str) -> Option<u64> {
        if let Some(active) = &self.active_peer {
            if active != peer_id {
                return None;
            }
        }
        self.active_peer = Some(peer_id.to_string());
        self.connecting_to = None;
        self.state = SessionState::Connected;
        self.last_error = None;
        self.generation += 1;
        self.files_received = 0;
        self.files_expected = 0;
        self.received_complete = false;
        self.served = false;
        Some(self.generation)
    }

    /// Connection rejected, failed or dropped. Returns `true` when it
    /// concerned the active or pending peer.
    pub fn on_connection_lost(&mut self, peer_id: &str, error: Option<String>) -> bool {
        let was_active = self.active_peer.as_deref() == Some(peer_id);
        let was_pending = self.connecting_to.as_deref() == Some(peer_id);
        if !was_active && !was_pending {
            return false;
        }
        self.active_peer = None;
        self.connecting_to = None;
        self.state = SessionState::Disconnected;
        if error.is_some() {
            self.last_error = error;
        }
        true
    }

    /// Whether delayed work scheduled for `generation` still targets the live session.
    pub fn is_current(&self, peer_id: &str, generation: u64) -> bool {
        self.generation == generation && self.active_peer.as_deref() == Some(peer_id)
    }

    pub fn record_file_received(&mut self) -> u32 {
        self.files_received += 1;
        self.files_received
    }

    pub const fn files_received(&self) -> u32 {
        self.files_received
    }

    /// Remember the remote's announced file count; it only grows within a session.
    pub fn expect_files(&mut self, total: u32) {
        self.files_expected = self.files_expected.max(total);
    }

    /// Announced file count, never below the number of files already started.
    pub fn files_expected(&self, current_file: u32) -> u32 {
        self.files_expected.max(current_file)
    }

    /// Remote finished sending. Returns `true` once both directions are done.
    pub fn mark_received_complete(&mut self) -> bool {
        self.received_complete = true;
        self.served
    }

    /// We finished sending. Returns `true` once both directions are done.
    pub fn mark_served(&mut self) -> bool {
        self.served = true;
        self.received_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn second_endpoint_is_skipped_while_connecting() {
        let mut session = PeerSession::new();
        session.set_discovering(true);
        assert_eq!(session.state(), SessionState::Discovering);

        assert!(session.on_endpoint_found("b"));
        assert!(!session.on_endpoint_found("c"));
        assert_eq!(session.state(), SessionState::Connecting);

        session.on_connected("b").unwrap();
        assert!(!session.on_endpoint_found("c"));
        assert_eq!(session.status().connected_devices, vec!["b".to_string()]);
    }

    #[test]
    fn second_connection_is_refused() {
        let mut session = PeerSession::new();
        assert_eq!(session.on_connected("b"), Some(1));
        assert_eq!(session.on_connected("c"), None);
        assert_eq!(session.active_peer(), Some("b"));
    }

    #[test]
    fn disconnect_clears_peer_and_invalidates_delayed_work() {
        let mut session = PeerSession::new();
        let generation = session.on_connected("b").unwrap();
        assert!(session.is_current("b", generation));

        assert!(session.on_connection_lost("b", Some("link lost".to_string())));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.active_peer().is_none());
        assert!(!session.is_current("b", generation));
        assert_eq!(session.status().error.as_deref(), Some("link lost"));

        assert!(!session.on_connection_lost("zzz", None));
    }

    #[test]
    fn lost_endpoint_releases_pending_connection() {
        let mut session = PeerSession::new();
        session.set_discovering(true);
        session.on_endpoint_found("b");
        session.on_endpoint_lost("b");
        assert_eq!(session.state(), SessionState::Discovering);
        assert!(session.on_endpoint_found("c"));
    }

    #[test]
    fn exchange_finishes_when_both_directions_are_done() {
        let mut session = PeerSession::new();
        session.on_connected("b");
        assert!(!session.mark_served());
        assert!(session.mark_received_complete());
    }

    #[test]
    fn expected_file_count_resets_per_connection() {
        let mut session = PeerSession::new();
        session.on_connected("b");
        assert_eq!(session.files_expected(1), 1);
        session.expect_files(3);
        session.expect_files(2);
        assert_eq!(session.files_expected(1), 3);
        assert_eq!(session.files_expected(4), 4);

        session.on_connection_lost("b", None);
        session.on_connected("b");
        assert_eq!(session.files_expected(0), 0);
    }
}

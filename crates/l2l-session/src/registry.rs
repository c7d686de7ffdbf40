//! Peer registry: the sessions a node is connected to.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// Connection state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Hello exchange completed, requests can flow.
    Connected,
    /// Connection lost; kept so a reconnect can be reported.
    Disconnected,
}

/// An entry representing a single known peer session.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Session id the peer announced.
    pub session_id: String,
    /// Socket address of the peer.
    pub address: SocketAddr,
    /// Connection state.
    pub state: PeerState,
    /// When the peer first connected.
    pub connected_at: DateTime<Utc>,
    /// Protocol version negotiated in the hello exchange.
    pub protocol_version: u32,
}

/// Thread-safe registry of all known peers.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<String, PeerEntry>>>,
}

impl PeerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a peer after a successful hello exchange.
    pub fn add_peer(&self, entry: PeerEntry) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(entry.session_id.clone(), entry);
    }

    /// Remove a peer entirely.
    pub fn remove_peer(&self, session_id: &str) -> Option<PeerEntry> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.remove(session_id)
    }

    /// Mark a peer as disconnected.
    pub fn mark_disconnected(&self, session_id: &str) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(session_id) {
            entry.state = PeerState::Disconnected;
        }
    }

    /// Get a snapshot of a specific peer.
    pub fn get_peer(&self, session_id: &str) -> Option<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(session_id).cloned()
    }

    /// Get all connected peers.
    pub fn connected_peers(&self) -> Vec<PeerEntry> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .cloned()
            .collect()
    }

    /// Number of connected peers.
    pub fn connected_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_peer(session_id: &str) -> PeerEntry {
        PeerEntry {
            session_id: session_id.to_string(),
            address: "127.0.0.1:9000".parse().unwrap(),
            state: PeerState::Connected,
            connected_at: Utc::now(),
            protocol_version: 1,
        }
    }

    #[test]
    fn test_add_and_get_peer() {
        let registry = PeerRegistry::new();
        registry.add_peer(make_peer("tracker:1"));
        let peer = registry.get_peer("tracker:1").unwrap();
        assert_eq!(peer.session_id, "tracker:1");
        assert_eq!(registry.connected_count(), 1);
    }

    #[test]
    fn test_disconnect_keeps_entry() {
        let registry = PeerRegistry::new();
        registry.add_peer(make_peer("tracker:1"));
        registry.mark_disconnected("tracker:1");
        assert_eq!(registry.connected_count(), 0);
        assert!(registry.connected_peers().is_empty());
        assert!(registry.get_peer("tracker:1").is_some());
        assert!(registry.remove_peer("tracker:1").is_some());
        assert!(registry.get_peer("tracker:1").is_none());
    }
}

//! Peer registry: tracking known remote nodes and their liveness.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

/// Information about a known peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    /// Last time we heard from this peer.
    pub last_seen: DateTime<Utc>,
    pub capabilities: Vec<String>,
}

impl PeerRecord {
    pub fn new(node_id: NodeId, host: impl Into<String>, port: u16, seen: DateTime<Utc>) -> Self {
        Self {
            node_id,
            host: host.into(),
            port,
            last_seen: seen,
            capabilities: Vec::new(),
        }
    }

    /// Whether the peer was heard from within `timeout` of `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        !is_expired(self.last_seen, now, timeout)
    }
}

/// What [`PeerRegistry::upsert`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A previously unknown peer was added.
    Inserted,
    /// An existing peer's address and last-seen time were updated.
    Refreshed,
    /// The registry is full and the peer is unknown.
    Rejected,
}

/// Registry of all known peers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<NodeId, PeerRecord>,
    capacity: Option<usize>,
}

impl PeerRegistry {
    /// Create an empty, unbounded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that holds at most `capacity` peers.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            peers: HashMap::new(),
            capacity: Some(capacity),
        }
    }

    /// Insert a peer, or refresh its address and `last_seen`.
    pub fn upsert(&mut self, record: PeerRecord) -> Upsert {
        if let Some(existing) = self.peers.get_mut(&record.node_id) {
            existing.host = record.host;
            existing.port = record.port;
            existing.last_seen = existing.last_seen.max(record.last_seen);
            return Upsert::Refreshed;
        }
        if self.capacity.is_some_and(|cap| self.peers.len() >= cap) {
            return Upsert::Rejected;
        }
        self.peers.insert(record.node_id.clone(), record);
        Upsert::Inserted
    }

    /// Update `last_seen` for a known peer. Returns `false` if unknown.
    pub fn touch(&mut self, node_id: &NodeId, now: DateTime<Utc>) -> bool {
        match self.peers.get_mut(node_id) {
            Some(peer) => {
                peer.last_seen = peer.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    /// Remove every peer whose `last_seen` is older than `timeout`.
    pub fn evict_expired(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<PeerRecord> {
        let expired: Vec<NodeId> = self
            .peers
            .values()
            .filter(|p| is_expired(p.last_seen, now, timeout))
            .map(|p| p.node_id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| self.peers.remove(id))
            .collect()
    }

    /// Get a peer by ID.
    pub fn get(&self, node_id: &NodeId) -> Option<&PeerRecord> {
        self.peers.get(node_id)
    }

    /// All known peers.
    pub fn all(&self) -> Vec<&PeerRecord> {
        self.peers.values().collect()
    }

    /// Peers heard from within `timeout` of `now`.
    pub fn fresh(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<&PeerRecord> {
        self.peers
            .values()
            .filter(|p| p.is_fresh(now, timeout))
            .collect()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

fn is_expired(last_seen: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    match chrono::Duration::from_std(timeout) {
        Ok(timeout) => now.signed_duration_since(last_seen) > timeout,
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

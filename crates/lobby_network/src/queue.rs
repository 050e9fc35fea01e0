//! Global queue state: pending request counts per node.
//!
//! The coordinator owns the authoritative copy and publishes it in
//! `queue_sync` messages; followers replace theirs wholesale on receipt.

use std::collections::BTreeMap;

use crate::identity::NodeId;
use crate::message::MessageBody;

/// Mapping from node ID to its number of pending match requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalQueueState {
    counts: BTreeMap<NodeId, u32>,
}

impl GlobalQueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, node: &NodeId) {
        let count = self.counts.entry(node.clone()).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Decrement a node's count, flooring at zero. Unknown nodes are left
    /// absent.
    pub fn decrement(&mut self, node: &NodeId) {
        if let Some(count) = self.counts.get_mut(node) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn get(&self, node: &NodeId) -> u32 {
        self.counts.get(node).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().fold(0u32, |acc, c| acc.saturating_add(*c))
    }

    pub fn counts(&self) -> &BTreeMap<NodeId, u32> {
        &self.counts
    }

    /// Replace the whole state with a received snapshot.
    pub fn overwrite(&mut self, counts: BTreeMap<NodeId, u32>) {
        self.counts = counts;
    }

    /// Build the `queue_sync` body announcing this state.
    pub fn sync_body(&self, coordinator_id: &NodeId) -> MessageBody {
        MessageBody::QueueSync {
            coordinator_id: coordinator_id.clone(),
            global_queue_state: self.counts.clone(),
            total_pending: self.total(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

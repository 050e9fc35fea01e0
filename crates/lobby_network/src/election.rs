//! Coordinator election: the smallest node ID among self and known peers.

use crate::identity::NodeId;

/// Pick the coordinator from `self_id` and `peers`.
pub fn elect<'a>(self_id: &'a NodeId, peers: impl IntoIterator<Item = &'a NodeId>) -> &'a NodeId {
    peers.into_iter().fold(self_id, |min, id| if id < min { id } else { min })
}

/// Result of applying a fresh election to the locally held coordinator value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: Option<NodeId>,
    pub current: NodeId,
    /// This node holds the coordinator role now and did not before.
    pub became_coordinator: bool,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.previous.as_ref() != Some(&self.current)
    }
}

/// Locally held coordinator view.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorView {
    coordinator: Option<NodeId>,
    is_coordinator: bool,
}

impl CoordinatorView {
    pub fn coordinator(&self) -> Option<&NodeId> {
        self.coordinator.as_ref()
    }

    pub fn is_coordinator(&self) -> bool {
        self.is_coordinator
    }

    /// Recompute from the current membership snapshot.
    pub fn recompute(&mut self, self_id: &NodeId, peers: &[NodeId]) -> Transition {
        let current = elect(self_id, peers).clone();
        self.apply(self_id, current)
    }

    /// Overwrite with a coordinator announced by a queue sync.
    pub fn assert_from_sync(&mut self, self_id: &NodeId, coordinator: NodeId) -> Transition {
        self.apply(self_id, coordinator)
    }

    fn apply(&mut self, self_id: &NodeId, current: NodeId) -> Transition {
        let was_coordinator = self.is_coordinator;
        let previous = self.coordinator.replace(current.clone());
        self.is_coordinator = &current == self_id;
        Transition {
            became_coordinator: self.is_coordinator && !was_coordinator,
            previous,
            current,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Type-safe node identifiers.
//!
//! Nodes of the full contact network are dense indices `0..population`.
//! The user network (the observed subset) re-indexes its nodes `0..n_users`;
//! those user-space positions are plain `usize` values and never wrapped,
//! so a [`NodeId`] always refers to the full population.

use serde::{Deserialize, Serialize};

/// Identifier of a node in the full contact network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Create a node identifier from its dense index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the dense index of this node.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl From<NodeId> for usize {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

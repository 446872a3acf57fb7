//! Node status maps produced by the kinetic simulator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::enums::Compartment;
use crate::ids::NodeId;

/// Compartment of every node at one instant, as reported by the kinetic model.
pub type StatusMap = BTreeMap<NodeId, Compartment>;

/// Number of nodes in each compartment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentCounts {
    /// Counts indexed by [`Compartment::index`].
    pub counts: [usize; Compartment::COUNT],
}

impl CompartmentCounts {
    /// Count the compartments of the given nodes. Nodes missing from
    /// `statuses` are skipped.
    pub fn of_nodes<'a>(statuses: &StatusMap, nodes: impl IntoIterator<Item = &'a NodeId>) -> Self {
        let mut counts = [0_usize; Compartment::COUNT];
        for node in nodes {
            if let Some(compartment) = statuses.get(node) {
                counts[compartment.index()] = counts[compartment.index()].saturating_add(1);
            }
        }
        Self { counts }
    }

    /// Count the compartments of every node in `statuses`.
    pub fn of_all(statuses: &StatusMap) -> Self {
        Self::of_nodes(statuses, statuses.keys())
    }

    /// Count for a single compartment.
    pub const fn get(&self, compartment: Compartment) -> usize {
        self.counts[compartment.index()]
    }

    /// Total number of counted nodes.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Restrict a status map to the given nodes.
pub fn slice_statuses<'a>(statuses: &StatusMap, nodes: impl IntoIterator<Item = &'a NodeId>) -> StatusMap {
    nodes
        .into_iter()
        .filter_map(|node| statuses.get(node).map(|status| (*node, *status)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses() -> StatusMap {
        let mut map = StatusMap::new();
        map.insert(NodeId(0), Compartment::S);
        map.insert(NodeId(1), Compartment::I);
        map.insert(NodeId(2), Compartment::I);
        map.insert(NodeId(3), Compartment::D);
        map
    }

    #[test]
    fn counts_all_nodes() {
        let counts = CompartmentCounts::of_all(&statuses());
        assert_eq!(counts.get(Compartment::S), 1);
        assert_eq!(counts.get(Compartment::I), 2);
        assert_eq!(counts.get(Compartment::D), 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn counts_only_requested_nodes() {
        let nodes = [NodeId(1), NodeId(3), NodeId(9)];
        let counts = CompartmentCounts::of_nodes(&statuses(), &nodes);
        assert_eq!(counts.get(Compartment::I), 1);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn slice_keeps_requested_subset() {
        let sliced = slice_statuses(&statuses(), &[NodeId(0), NodeId(2)]);
        assert_eq!(sliced.len(), 2);
        assert_eq!(sliced.get(&NodeId(2)), Some(&Compartment::I));
    }
}

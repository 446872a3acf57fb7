//! Error types for the `contagion-models` crate.

use contagion_types::NodeId;

/// Errors raised while building a reference collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A user node does not exist in the full network.
    #[error("user node {node} is outside a population of {population}")]
    UserOutOfRange {
        /// The offending node.
        node: NodeId,
        /// Nodes in the full network.
        population: usize,
    },

    /// The user subset is empty.
    #[error("the user network must contain at least one node")]
    NoUsers,

    /// More seed infections were requested than there are nodes.
    #[error("cannot seed {requested} infections in a population of {population}")]
    TooManySeeds {
        /// Seed infections requested.
        requested: usize,
        /// Nodes in the network.
        population: usize,
    },
}

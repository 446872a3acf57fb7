//! Projection of the full contact network onto a fixed user subset.
//!
//! Users are the nodes the forecast models and the sources observe. User
//! position `k` is the `k`-th user in ascending node order; edges between a
//! user and a non-user are dropped by the projection.

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::index;

use contagion_core::UserNetworkProjector;
use contagion_filter::ObservedNetwork;
use contagion_types::{ContactMatrix, ContactNetwork, NodeId};

use crate::error::ModelError;

/// The user network, re-projected from every realized full network.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsetUserNetwork {
    /// Full-population ids by user position.
    users: Vec<NodeId>,
    /// Full-population indices by user position.
    indices: Vec<usize>,
    /// Contact durations between user positions.
    weights: ContactMatrix,
    /// Activation rate per user position.
    lambda_integrated: Vec<f64>,
    /// Midday contact-rate cap set by social distancing.
    lambda_cap: Option<f64>,
}

impl SubsetUserNetwork {
    /// Project `network` onto the given users.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NoUsers`] for an empty subset or
    /// [`ModelError::UserOutOfRange`] for a node outside the network.
    pub fn new(mut users: Vec<NodeId>, network: &ContactNetwork) -> Result<Self, ModelError> {
        if users.is_empty() {
            return Err(ModelError::NoUsers);
        }
        users.sort_unstable();
        users.dedup();
        if let Some(&node) = users.iter().find(|node| node.index() >= network.node_count()) {
            return Err(ModelError::UserOutOfRange {
                node,
                population: network.node_count(),
            });
        }
        let indices = users.iter().map(|node| node.index()).collect();
        let mut projected = Self {
            users,
            indices,
            weights: ContactMatrix::new(0),
            lambda_integrated: Vec::new(),
            lambda_cap: None,
        };
        projected.update_from(network);
        Ok(projected)
    }

    /// Draw `round(user_fraction * n)` users at random, at least one.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NoUsers`] if the network is empty.
    pub fn random(network: &ContactNetwork, user_fraction: f64, seed: u64) -> Result<Self, ModelError> {
        let population = network.node_count();
        let target = (user_fraction.clamp(0.0, 1.0) * population as f64).round();
        let wanted = count_from(target).clamp(1.min(population), population);
        let mut rng = SmallRng::seed_from_u64(seed);
        let users = index::sample(&mut rng, population, wanted)
            .into_iter()
            .map(NodeId)
            .collect();
        Self::new(users, network)
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the subset is empty. Never true for a constructed network.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Convert a rounded, non-negative float into a count.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count_from(rounded: f64) -> usize {
    // Range-checked: finite and non-negative.
    if rounded.is_finite() && rounded >= 0.0 { rounded as usize } else { 0 }
}

impl ObservedNetwork for SubsetUserNetwork {
    fn user_nodes(&self) -> &[NodeId] {
        &self.users
    }

    fn neighbors(&self, node: usize) -> Vec<usize> {
        self.weights.neighbors(node)
    }
}

impl UserNetworkProjector for SubsetUserNetwork {
    fn update_from(&mut self, network: &ContactNetwork) {
        self.weights = network.weights().submatrix(&self.indices);
        let rates = network.lambda_integrated();
        self.lambda_integrated = self
            .indices
            .iter()
            .map(|&i| {
                let rate = rates.get(i).copied().unwrap_or(0.0);
                self.lambda_cap.map_or(rate, |cap| rate.min(cap))
            })
            .collect();
    }

    fn edge_weights(&self) -> &ContactMatrix {
        &self.weights
    }

    fn lambda_integrated(&self) -> &[f64] {
        &self.lambda_integrated
    }

    fn set_max_contact_rate(&mut self, lambda_max: f64) {
        self.lambda_cap = Some(lambda_max);
        for rate in &mut self.lambda_integrated {
            *rate = rate.min(lambda_max);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    /// Path graph 0 - 1 - 2 - 3 - 4 with weight `a + b` on edge `(a, b)`.
    fn path() -> ContactNetwork {
        let mut network = ContactNetwork::from_edges(5, (0..4).map(|i| (i, i + 1)), 5.0, 22.0);
        for i in 0..4 {
            network.weights_mut().set_weight(i, i + 1, (2 * i + 1) as f64);
        }
        network
    }

    #[test]
    fn projection_keeps_only_edges_between_users() {
        let users = SubsetUserNetwork::new(vec![NodeId(3), NodeId(1), NodeId(2)], &path()).unwrap();

        assert_eq!(users.user_nodes(), &[NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(users.edge_weights().edge_count(), 2);
        assert_relative_eq!(users.edge_weights().weight(0, 1), 3.0);
        assert_relative_eq!(users.edge_weights().weight(1, 2), 5.0);
        assert_eq!(users.neighbors(0), vec![1]);
    }

    #[test]
    fn distancing_cap_survives_reprojection() {
        let network = path();
        let mut users = SubsetUserNetwork::new(vec![NodeId(0), NodeId(4)], &network).unwrap();
        assert_relative_eq!(users.lambda_integrated()[0], 13.5);

        users.set_max_contact_rate(8.0);
        users.update_from(&network);
        assert_relative_eq!(users.lambda_integrated()[1], 8.0);
    }

    #[test]
    fn invalid_subsets_are_rejected() {
        assert!(matches!(
            SubsetUserNetwork::new(Vec::new(), &path()),
            Err(ModelError::NoUsers)
        ));
        assert!(matches!(
            SubsetUserNetwork::new(vec![NodeId(9)], &path()),
            Err(ModelError::UserOutOfRange { population: 5, .. })
        ));
    }

    #[test]
    fn random_subset_has_the_requested_size() {
        let network = crate::network::generate_contact_network(100, 6.0, 5.0, 22.0, 2);
        let users = SubsetUserNetwork::random(&network, 0.25, 4).unwrap();
        assert_eq!(users.len(), 25);
        let tiny = SubsetUserNetwork::random(&network, 0.001, 4).unwrap();
        assert_eq!(tiny.len(), 1);
    }
}

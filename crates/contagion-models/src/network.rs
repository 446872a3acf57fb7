//! Synthetic contact networks.
//!
//! The reference population is a G(n, p) random graph: every pair of nodes is
//! connected independently with probability `mean_degree / (n - 1)`. Edge
//! weights start at zero and are realized by the kinetic model on its first
//! interval.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use contagion_types::ContactNetwork;

/// Draw a random contact network over `n_nodes` nodes with the given mean
/// degree and uniform diurnal contact-rate bounds.
pub fn generate_contact_network(
    n_nodes: usize,
    mean_degree: f64,
    lambda_min: f64,
    lambda_max: f64,
    seed: u64,
) -> ContactNetwork {
    let mut rng = SmallRng::seed_from_u64(seed);
    let probability = if n_nodes > 1 {
        (mean_degree / (n_nodes - 1) as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut edges = Vec::new();
    for a in 0..n_nodes {
        for b in a + 1..n_nodes {
            if rng.random_bool(probability) {
                edges.push((a, b));
            }
        }
    }
    let network = ContactNetwork::from_edges(n_nodes, edges, lambda_min, lambda_max);
    info!(
        nodes = n_nodes,
        edges = network.weights().edge_count(),
        mean_degree,
        "Contact network generated"
    );
    network
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_degree_is_close_to_the_target() {
        let network = generate_contact_network(400, 8.0, 5.0, 22.0, 3);
        let degree = 2.0 * network.weights().edge_count() as f64 / 400.0;
        assert!((degree - 8.0).abs() < 1.0, "mean degree {degree}");
        assert_eq!(network.node_count(), 400);
    }

    #[test]
    fn same_seed_gives_the_same_graph() {
        let a = generate_contact_network(50, 4.0, 5.0, 22.0, 11);
        let b = generate_contact_network(50, 4.0, 5.0, 22.0, 11);
        assert_eq!(a, b);
    }

    #[test]
    fn single_node_has_no_edges() {
        let network = generate_contact_network(1, 8.0, 5.0, 22.0, 0);
        assert_eq!(network.weights().edge_count(), 0);
    }
}

//! Contact networks and sparse contact-duration matrices.
//!
//! A [`ContactNetwork`] is the full-population graph the kinetic simulator
//! runs on. Its edge weights are the mean contact durations (days) over the
//! most recent static contact interval, and every node carries the bounds of
//! its diurnal contact rate (`λ_min` at night, `λ_max` at midday) plus the
//! activation rate integrated over the interval. Interventions act on the
//! network by changing those bounds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Symmetric sparse matrix of mean contact durations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactMatrix {
    /// Adjacency rows: `rows[a][b]` is the weight of edge `(a, b)`.
    rows: Vec<BTreeMap<usize, f64>>,
}

impl ContactMatrix {
    /// Create an empty matrix over `dim` nodes.
    pub fn new(dim: usize) -> Self {
        Self {
            rows: vec![BTreeMap::new(); dim],
        }
    }

    /// Number of nodes.
    pub fn dim(&self) -> usize {
        self.rows.len()
    }

    /// Set the weight of the undirected edge `(a, b)`.
    ///
    /// Self-loops and out-of-range indices are ignored.
    pub fn set_weight(&mut self, a: usize, b: usize, weight: f64) {
        if a == b || a >= self.rows.len() || b >= self.rows.len() {
            return;
        }
        self.rows[a].insert(b, weight);
        self.rows[b].insert(a, weight);
    }

    /// Weight of edge `(a, b)`, zero if absent.
    pub fn weight(&self, a: usize, b: usize) -> f64 {
        self.rows
            .get(a)
            .and_then(|row| row.get(&b))
            .copied()
            .unwrap_or(0.0)
    }

    /// Entries of row `a` as `(neighbor, weight)` pairs in ascending order.
    pub fn row(&self, a: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.rows
            .get(a)
            .into_iter()
            .flat_map(|row| row.iter().map(|(&b, &w)| (b, w)))
    }

    /// Neighbors of `a` (every stored edge, including zero-weight ones).
    pub fn neighbors(&self, a: usize) -> Vec<usize> {
        self.rows
            .get(a)
            .map(|row| row.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every undirected edge once, as `(a, b, weight)` with `a < b`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows.iter().enumerate().flat_map(|(a, row)| {
            row.range(a.saturating_add(1)..).map(move |(&b, &w)| (a, b, w))
        })
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.edges().count()
    }

    /// Restrict the matrix to `nodes`, re-indexed by their position in the slice.
    pub fn submatrix(&self, nodes: &[usize]) -> Self {
        let position: BTreeMap<usize, usize> =
            nodes.iter().enumerate().map(|(i, &node)| (node, i)).collect();
        let mut sub = Self::new(nodes.len());
        for (i, &node) in nodes.iter().enumerate() {
            for (neighbor, weight) in self.row(node) {
                if let Some(&j) = position.get(&neighbor) {
                    sub.rows[i].insert(j, weight);
                }
            }
        }
        sub
    }
}

/// The full-population contact network for one static contact interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactNetwork {
    /// Mean contact durations over the interval.
    weights: ContactMatrix,
    /// Night-time (minimum) contact rate per node.
    lambda_min: Vec<f64>,
    /// Midday (maximum) contact rate per node.
    lambda_max: Vec<f64>,
    /// Activation rate integrated over the diurnal cycle, per node.
    lambda_integrated: Vec<f64>,
}

impl ContactNetwork {
    /// Create a network over `node_count` nodes with the given undirected
    /// edges (weights start at zero) and uniform contact-rate bounds.
    pub fn from_edges(
        node_count: usize,
        edges: impl IntoIterator<Item = (usize, usize)>,
        lambda_min: f64,
        lambda_max: f64,
    ) -> Self {
        let mut weights = ContactMatrix::new(node_count);
        for (a, b) in edges {
            weights.set_weight(a, b, 0.0);
        }
        Self {
            weights,
            lambda_min: vec![lambda_min; node_count],
            lambda_max: vec![lambda_max; node_count],
            lambda_integrated: vec![0.5 * (lambda_min + lambda_max); node_count],
        }
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.weights.dim()
    }

    /// All node identifiers.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.node_count()).map(NodeId)
    }

    /// Mean contact durations.
    pub const fn weights(&self) -> &ContactMatrix {
        &self.weights
    }

    /// Mutable access to the mean contact durations (kinetic simulator only).
    pub const fn weights_mut(&mut self) -> &mut ContactMatrix {
        &mut self.weights
    }

    /// Neighbors of `node` in the graph.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        self.weights.neighbors(node.0).into_iter().map(NodeId).collect()
    }

    /// Contact-rate bounds `(λ_min, λ_max)` per node.
    pub fn lambdas(&self) -> (&[f64], &[f64]) {
        (&self.lambda_min, &self.lambda_max)
    }

    /// Set uniform contact-rate bounds on every node.
    pub fn set_lambdas(&mut self, lambda_min: f64, lambda_max: f64) {
        self.lambda_min.fill(lambda_min);
        self.lambda_max.fill(lambda_max);
    }

    /// Cap the midday contact rate of every node at `lambda_max`.
    pub fn set_max_contact_rate(&mut self, lambda_max: f64) {
        self.lambda_max.fill(lambda_max);
        for (min, max) in self.lambda_min.iter_mut().zip(&self.lambda_max) {
            *min = min.min(*max);
        }
    }

    /// Pin the contact rate of the given nodes to `lambda_isolation`.
    ///
    /// Nodes outside the population are ignored.
    pub fn isolate<'a>(&mut self, nodes: impl IntoIterator<Item = &'a NodeId>, lambda_isolation: f64) {
        for node in nodes {
            if let (Some(min), Some(max)) =
                (self.lambda_min.get_mut(node.0), self.lambda_max.get_mut(node.0))
            {
                *min = lambda_isolation;
                *max = lambda_isolation;
            }
        }
    }

    /// Diurnally integrated activation rate per node.
    pub fn lambda_integrated(&self) -> &[f64] {
        &self.lambda_integrated
    }

    /// Replace the integrated activation rates (kinetic simulator only).
    pub fn set_lambda_integrated(&mut self, rates: Vec<f64>) {
        if rates.len() == self.node_count() {
            self.lambda_integrated = rates;
        }
    }
}

//! The ensemble state matrix.
//!
//! Row `m` is ensemble member `m`; column `c * n_nodes + n` is the
//! probability that node `n` occupies compartment `c`. Per member and node
//! the six probabilities sum to one. [`EnsembleState::enforce_mass_conservation`]
//! restores that invariant after an assimilation update.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::enums::Compartment;

/// A matrix did not have the shape an ensemble container requires.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("shape mismatch for {what}: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
pub struct ShapeError {
    /// Which container was being built.
    pub what: &'static str,
    /// Required number of rows.
    pub expected_rows: usize,
    /// Required number of columns.
    pub expected_cols: usize,
    /// Actual number of rows.
    pub rows: usize,
    /// Actual number of columns.
    pub cols: usize,
}

/// Probabilistic compartment occupancy for every ensemble member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleState {
    /// `ensemble_size x (compartments * n_nodes)` values.
    values: DMatrix<f64>,
    /// Number of nodes in the user population.
    n_nodes: usize,
}

impl EnsembleState {
    /// Wrap a matrix, checking that it has one column per compartment and node.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] if the column count is not
    /// `Compartment::COUNT * n_nodes` or the ensemble is empty.
    pub fn from_matrix(values: DMatrix<f64>, n_nodes: usize) -> Result<Self, ShapeError> {
        let expected_cols = Compartment::COUNT * n_nodes;
        if values.ncols() != expected_cols || values.nrows() == 0 {
            return Err(ShapeError {
                what: "ensemble state",
                expected_rows: values.nrows().max(1),
                expected_cols,
                rows: values.nrows(),
                cols: values.ncols(),
            });
        }
        Ok(Self { values, n_nodes })
    }

    /// Every member starts with each node susceptible except for an
    /// `infected_fraction` placed in the infectious compartment.
    pub fn uniform(ensemble_size: usize, n_nodes: usize, infected_fraction: f64) -> Self {
        let infected = infected_fraction.clamp(0.0, 1.0);
        let mut values = DMatrix::zeros(ensemble_size.max(1), Compartment::COUNT * n_nodes);
        for node in 0..n_nodes {
            values
                .column_mut(Compartment::S.index() * n_nodes + node)
                .fill(1.0 - infected);
            values
                .column_mut(Compartment::I.index() * n_nodes + node)
                .fill(infected);
        }
        Self { values, n_nodes }
    }

    /// Number of ensemble members.
    pub fn ensemble_size(&self) -> usize {
        self.values.nrows()
    }

    /// Number of nodes.
    pub const fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Number of state columns.
    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }

    /// Column holding `compartment` of `node`.
    pub const fn column_index(&self, compartment: Compartment, node: usize) -> usize {
        compartment.index() * self.n_nodes + node
    }

    /// Probability that `node` of `member` is in `compartment`.
    pub fn get(&self, member: usize, compartment: Compartment, node: usize) -> f64 {
        self.values[(member, self.column_index(compartment, node))]
    }

    /// Set the probability that `node` of `member` is in `compartment`.
    pub fn set(&mut self, member: usize, compartment: Compartment, node: usize, value: f64) {
        let column = self.column_index(compartment, node);
        self.values[(member, column)] = value;
    }

    /// The underlying matrix.
    pub const fn matrix(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Mutable access to the underlying matrix.
    pub const fn matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.values
    }

    /// Consume the state and return the matrix.
    pub fn into_matrix(self) -> DMatrix<f64> {
        self.values
    }

    /// Ensemble mean of every column.
    pub fn mean(&self) -> DVector<f64> {
        self.values.row_mean().transpose()
    }

    /// Ensemble variance of every column (population variance).
    pub fn variance(&self) -> DVector<f64> {
        self.values.row_variance().transpose()
    }

    /// Ensemble mean of `compartment` for each node.
    pub fn compartment_mean(&self, compartment: Compartment) -> DVector<f64> {
        let start = compartment.index() * self.n_nodes;
        self.values
            .columns(start, self.n_nodes)
            .row_mean()
            .transpose()
    }

    /// Population fraction in each compartment, per member:
    /// `ensemble_size x Compartment::COUNT`.
    pub fn compartment_fractions(&self) -> DMatrix<f64> {
        let mut fractions = DMatrix::zeros(self.ensemble_size(), Compartment::COUNT);
        if self.n_nodes == 0 {
            return fractions;
        }
        let population = self.n_nodes as f64;
        for compartment in Compartment::ALL {
            let start = compartment.index() * self.n_nodes;
            let totals = self.values.columns(start, self.n_nodes).column_sum();
            fractions
                .column_mut(compartment.index())
                .copy_from(&(totals / population));
        }
        fractions
    }

    /// Clip every probability to `[0, 1]` and rescale each member's node so
    /// its compartments sum to one.
    ///
    /// A node whose clipped probabilities sum to zero is reset to fully
    /// susceptible.
    pub fn enforce_mass_conservation(&mut self) {
        self.clip_unit_interval();
        let n = self.n_nodes;
        for member in 0..self.ensemble_size() {
            for node in 0..n {
                let total: f64 = Compartment::ALL
                    .iter()
                    .map(|c| self.values[(member, c.index() * n + node)])
                    .sum();
                if total > 0.0 {
                    for c in Compartment::ALL {
                        self.values[(member, c.index() * n + node)] /= total;
                    }
                } else {
                    self.values[(member, Compartment::S.index() * n + node)] = 1.0;
                }
            }
        }
    }

    /// Clip every probability to `[0, 1]` without renormalizing.
    pub fn clip_unit_interval(&mut self) {
        self.values.apply(|v| *v = v.clamp(0.0, 1.0));
    }

    /// Largest deviation from one of any member/node compartment sum.
    pub fn max_mass_error(&self) -> f64 {
        let n = self.n_nodes;
        let mut worst: f64 = 0.0;
        for member in 0..self.ensemble_size() {
            for node in 0..n {
                let total: f64 = Compartment::ALL
                    .iter()
                    .map(|c| self.values[(member, c.index() * n + node)])
                    .sum();
                worst = worst.max((total - 1.0).abs());
            }
        }
        worst
    }
}

//! Per-member epidemiological parameters.
//!
//! Two parameter families travel with the ensemble state:
//!
//! - [`TransitionRateEnsemble`]: the six clinical quantities of every node,
//!   one row per member, stored kind-major (`kind * n_nodes + node`).
//! - [`TransmissionRateEnsemble`]: either one population-wide transmission
//!   rate per member or one per node.
//!
//! Both are bounded; [`ParameterBounds::clamp`] is applied after every
//! assimilation update.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::ensemble::ShapeError;
use crate::enums::ClinicalRate;

/// Closed interval a learned parameter is clipped to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl ParameterBounds {
    /// Create bounds. Callers validate `min <= max`.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clip `value` into the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    /// Whether `value` lies inside the interval.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Whether the bounds form a non-empty finite interval.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Clinical quantities of every node for every ensemble member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRateEnsemble {
    /// `ensemble_size x (ClinicalRate::COUNT * n_nodes)` values.
    values: DMatrix<f64>,
    /// Number of nodes.
    n_nodes: usize,
}

impl TransitionRateEnsemble {
    /// Every member and node shares the same clinical quantities.
    pub fn uniform(ensemble_size: usize, n_nodes: usize, rates: [f64; ClinicalRate::COUNT]) -> Self {
        let mut values = DMatrix::zeros(ensemble_size.max(1), ClinicalRate::COUNT * n_nodes);
        for kind in ClinicalRate::ALL {
            values
                .columns_mut(kind.index() * n_nodes, n_nodes)
                .fill(rates[kind.index()]);
        }
        Self { values, n_nodes }
    }

    /// Wrap a matrix of the right width.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] if the width is not `ClinicalRate::COUNT * n_nodes`.
    pub fn from_matrix(values: DMatrix<f64>, n_nodes: usize) -> Result<Self, ShapeError> {
        let expected_cols = ClinicalRate::COUNT * n_nodes;
        if values.ncols() != expected_cols || values.nrows() == 0 {
            return Err(ShapeError {
                what: "transition rates",
                expected_rows: values.nrows().max(1),
                expected_cols,
                rows: values.nrows(),
                cols: values.ncols(),
            });
        }
        Ok(Self { values, n_nodes })
    }

    /// Number of ensemble members.
    pub fn ensemble_size(&self) -> usize {
        self.values.nrows()
    }

    /// Number of nodes.
    pub const fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Value of `kind` at `node` for `member`.
    pub fn get(&self, member: usize, kind: ClinicalRate, node: usize) -> f64 {
        self.values[(member, kind.index() * self.n_nodes + node)]
    }

    /// Set the value of `kind` at `node` for `member`.
    pub fn set(&mut self, member: usize, kind: ClinicalRate, node: usize, value: f64) {
        let column = kind.index() * self.n_nodes + node;
        self.values[(member, column)] = value;
    }

    /// Copy of the `ensemble_size x n_nodes` block holding `kind`.
    pub fn kind_block(&self, kind: ClinicalRate) -> DMatrix<f64> {
        self.values
            .columns(kind.index() * self.n_nodes, self.n_nodes)
            .into_owned()
    }

    /// Overwrite the block holding `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] if `block` is not `ensemble_size x n_nodes`.
    pub fn set_kind_block(&mut self, kind: ClinicalRate, block: &DMatrix<f64>) -> Result<(), ShapeError> {
        if block.nrows() != self.ensemble_size() || block.ncols() != self.n_nodes {
            return Err(ShapeError {
                what: "transition rate block",
                expected_rows: self.ensemble_size(),
                expected_cols: self.n_nodes,
                rows: block.nrows(),
                cols: block.ncols(),
            });
        }
        self.values
            .columns_mut(kind.index() * self.n_nodes, self.n_nodes)
            .copy_from(block);
        Ok(())
    }

    /// Clip every value of `kind` into `bounds`.
    pub fn clamp_kind(&mut self, kind: ClinicalRate, bounds: &ParameterBounds) {
        self.values
            .columns_mut(kind.index() * self.n_nodes, self.n_nodes)
            .apply(|v| *v = bounds.clamp(*v));
    }

    /// Node-averaged value of each kind per member: `ensemble_size x 6`.
    pub fn network_means(&self) -> DMatrix<f64> {
        let mut means = DMatrix::zeros(self.ensemble_size(), ClinicalRate::COUNT);
        if self.n_nodes == 0 {
            return means;
        }
        for kind in ClinicalRate::ALL {
            let block = self.values.columns(kind.index() * self.n_nodes, self.n_nodes);
            means.column_mut(kind.index()).copy_from(&block.column_mean());
        }
        means
    }

    /// The underlying matrix.
    pub const fn matrix(&self) -> &DMatrix<f64> {
        &self.values
    }
}

/// Transmission rate of every ensemble member.
///
/// One column means a population-wide scalar; `n_nodes` columns mean a
/// per-node rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionRateEnsemble {
    /// `ensemble_size x width` values.
    values: DMatrix<f64>,
}

impl TransmissionRateEnsemble {
    /// A population-wide rate, equal for every member.
    pub fn population_wide(ensemble_size: usize, rate: f64) -> Self {
        Self {
            values: DMatrix::from_element(ensemble_size.max(1), 1, rate),
        }
    }

    /// A per-node rate, equal for every member and node.
    pub fn per_node(ensemble_size: usize, n_nodes: usize, rate: f64) -> Self {
        Self {
            values: DMatrix::from_element(ensemble_size.max(1), n_nodes.max(1), rate),
        }
    }

    /// Wrap an `ensemble_size x width` matrix.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] for an empty matrix.
    pub fn from_matrix(values: DMatrix<f64>) -> Result<Self, ShapeError> {
        if values.nrows() == 0 || values.ncols() == 0 {
            return Err(ShapeError {
                what: "transmission rate",
                expected_rows: 1,
                expected_cols: 1,
                rows: values.nrows(),
                cols: values.ncols(),
            });
        }
        Ok(Self { values })
    }

    /// Number of ensemble members.
    pub fn ensemble_size(&self) -> usize {
        self.values.nrows()
    }

    /// Number of columns: 1 or the node count.
    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    /// Whether each node has its own rate.
    pub fn is_per_node(&self) -> bool {
        self.values.ncols() > 1
    }

    /// Rate seen by `node` in `member`.
    pub fn rate(&self, member: usize, node: usize) -> f64 {
        if self.is_per_node() {
            self.values[(member, node)]
        } else {
            self.values[(member, 0)]
        }
    }

    /// Ensemble mean of every column.
    pub fn column_means(&self) -> DVector<f64> {
        self.values.row_mean().transpose()
    }

    /// Mean over members and columns.
    pub fn mean(&self) -> f64 {
        self.values.mean()
    }

    /// Mean over members and columns of the natural logarithm.
    pub fn log_mean(&self) -> f64 {
        self.values.map(|v| v.max(f64::MIN_POSITIVE).ln()).mean()
    }

    /// Per-member mean over columns: `ensemble_size x 1`.
    pub fn member_means(&self) -> DVector<f64> {
        self.values.column_mean()
    }

    /// Clip every value into `bounds`.
    pub fn clamp(&mut self, bounds: &ParameterBounds) {
        self.values.apply(|v| *v = bounds.clamp(*v));
    }

    /// The underlying matrix.
    pub const fn matrix(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Mutable access to the underlying matrix.
    pub const fn matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.values
    }
}

/// Everything the master equations need besides the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEnsemble {
    /// Clinical quantities per node.
    pub transition_rates: TransitionRateEnsemble,
    /// Transmission rate.
    pub transmission_rate: TransmissionRateEnsemble,
}

impl ParameterEnsemble {
    /// Number of ensemble members.
    pub fn ensemble_size(&self) -> usize {
        self.transition_rates.ensemble_size()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    const RATES: [f64; ClinicalRate::COUNT] = [3.7, 3.2, 10.0, 0.1, 0.01, 0.1];

    #[test]
    fn uniform_rates_fill_each_kind() {
        let rates = TransitionRateEnsemble::uniform(3, 4, RATES);
        assert_relative_eq!(rates.get(2, ClinicalRate::HospitalInfectionPeriod, 3), 10.0);
        let means = rates.network_means();
        assert_eq!(means.shape(), (3, 6));
        assert_relative_eq!(means[(1, ClinicalRate::LatentPeriod.index())], 3.7);
    }

    #[test]
    fn clamp_kind_only_touches_that_kind() {
        let mut rates = TransitionRateEnsemble::uniform(2, 2, RATES);
        rates.set(0, ClinicalRate::LatentPeriod, 1, 50.0);
        rates.set(0, ClinicalRate::HospitalInfectionPeriod, 0, 50.0);
        rates.clamp_kind(ClinicalRate::LatentPeriod, &ParameterBounds::new(2.0, 5.0));
        assert_relative_eq!(rates.get(0, ClinicalRate::LatentPeriod, 1), 5.0);
        assert_relative_eq!(rates.get(0, ClinicalRate::HospitalInfectionPeriod, 0), 50.0);
    }

    #[test]
    fn kind_block_round_trips() {
        let mut rates = TransitionRateEnsemble::uniform(2, 3, RATES);
        let mut block = rates.kind_block(ClinicalRate::HospitalizationFraction);
        block[(1, 2)] = 0.4;
        rates
            .set_kind_block(ClinicalRate::HospitalizationFraction, &block)
            .unwrap();
        assert_relative_eq!(rates.get(1, ClinicalRate::HospitalizationFraction, 2), 0.4);
        assert!(rates
            .set_kind_block(ClinicalRate::LatentPeriod, &DMatrix::zeros(1, 1))
            .is_err());
    }

    #[test]
    fn population_wide_rate_applies_to_every_node() {
        let beta = TransmissionRateEnsemble::population_wide(4, 12.0);
        assert!(!beta.is_per_node());
        assert_relative_eq!(beta.rate(3, 99), 12.0);
        assert_relative_eq!(beta.log_mean(), 12.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn transmission_clamp_respects_bounds() {
        let mut beta = TransmissionRateEnsemble::per_node(2, 3, 30.0);
        let bounds = ParameterBounds::new(0.0, 20.0);
        beta.clamp(&bounds);
        assert!(beta.matrix().iter().all(|&v| bounds.contains(v)));
    }

    #[test]
    fn bounds_validity() {
        assert!(ParameterBounds::new(0.0, 1.0).is_valid());
        assert!(!ParameterBounds::new(2.0, 1.0).is_valid());
    }
}

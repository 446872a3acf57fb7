//! The joint assimilation vector.
//!
//! A source assimilates the ensemble state together with whichever
//! parameters it learns. The joint matrix has one row per member and the
//! column layout
//!
//! ```text
//! [ state (6 · n) | learned transition kinds (k · n) | transmission rate (1 or n) ]
//! ```
//!
//! Parameters enter the joint matrix through their [`ParameterTransform`]
//! and leave it through the inverse, then are clipped to their bounds.

use nalgebra::DMatrix;

use contagion_types::{
    ClinicalRate, Compartment, EnsembleState, ParameterBounds, ParameterEnsemble, ParameterTransform, ShapeError,
};

/// Which parameters exist, how they are transformed, and their bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSettings {
    /// Transition-rate kinds the run learns.
    pub learned_kinds: Vec<ClinicalRate>,
    /// Whether the run learns the transmission rate.
    pub learn_transmission_rate: bool,
    /// Transform applied inside the joint vector.
    pub transform: ParameterTransform,
    /// Bounds for each transition-rate kind, indexed by [`ClinicalRate::index`].
    pub transition_bounds: [ParameterBounds; ClinicalRate::COUNT],
    /// Bounds for the transmission rate.
    pub transmission_bounds: ParameterBounds,
}

impl Default for ParameterSettings {
    fn default() -> Self {
        Self {
            learned_kinds: Vec::new(),
            learn_transmission_rate: false,
            transform: ParameterTransform::Identity,
            transition_bounds: [ParameterBounds::new(0.0, f64::MAX); ClinicalRate::COUNT],
            transmission_bounds: ParameterBounds::new(0.0, f64::MAX),
        }
    }
}

/// Column layout of one source's joint matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointLayout {
    /// Number of user nodes.
    n_nodes: usize,
    /// Transition-rate kinds included, in column order.
    kinds: Vec<ClinicalRate>,
    /// Number of transmission-rate columns (zero if not learned).
    transmission_width: usize,
}

impl JointLayout {
    /// Layout for `n_nodes` nodes with the given learned parameters.
    pub fn new(n_nodes: usize, kinds: Vec<ClinicalRate>, transmission_width: usize) -> Self {
        Self {
            n_nodes,
            kinds,
            transmission_width,
        }
    }

    /// Number of state columns.
    pub const fn state_width(&self) -> usize {
        Compartment::COUNT * self.n_nodes
    }

    /// Total number of columns.
    pub fn width(&self) -> usize {
        self.state_width() + self.kinds.len() * self.n_nodes + self.transmission_width
    }

    /// Number of nodes.
    pub const fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Column of `compartment` at `node`.
    pub const fn state_column(&self, compartment: Compartment, node: usize) -> usize {
        compartment.index() * self.n_nodes + node
    }

    /// Whether the layout carries a per-node transmission rate.
    pub const fn per_node_transmission(&self) -> bool {
        self.transmission_width > 1
    }

    /// Columns that belong to `node`: its state, its learned transition
    /// rates and, if per-node, its transmission rate.
    pub fn node_block(&self, node: usize) -> Vec<usize> {
        let n = self.n_nodes;
        let mut block: Vec<usize> = Compartment::ALL.iter().map(|c| c.index() * n + node).collect();
        let rates_start = self.state_width();
        block.extend((0..self.kinds.len()).map(|k| rates_start + k * n + node));
        if self.per_node_transmission() {
            block.push(rates_start + self.kinds.len() * n + node);
        }
        block
    }

    /// All state columns.
    pub fn state_columns(&self) -> Vec<usize> {
        (0..self.state_width()).collect()
    }

    /// State columns of one compartment.
    pub fn compartment_columns(&self, compartment: Compartment) -> Vec<usize> {
        let start = compartment.index() * self.n_nodes;
        (start..start + self.n_nodes).collect()
    }

    /// Transmission-rate columns.
    pub fn transmission_columns(&self) -> Vec<usize> {
        let start = self.state_width() + self.kinds.len() * self.n_nodes;
        (start..start + self.transmission_width).collect()
    }

    /// Assemble the joint matrix from state and parameters.
    pub fn build(
        &self,
        state: &EnsembleState,
        parameters: &ParameterEnsemble,
        transform: ParameterTransform,
    ) -> DMatrix<f64> {
        let members = state.ensemble_size();
        let n = self.n_nodes;
        let mut joint = DMatrix::zeros(members, self.width());
        joint
            .columns_mut(0, self.state_width())
            .copy_from(state.matrix());
        let mut offset = self.state_width();
        for &kind in &self.kinds {
            let block = parameters.transition_rates.kind_block(kind);
            joint
                .columns_mut(offset, n)
                .copy_from(&block.map(|v| transform.forward(v)));
            offset += n;
        }
        if self.transmission_width > 0 {
            let beta = parameters.transmission_rate.matrix();
            joint
                .columns_mut(offset, self.transmission_width)
                .copy_from(&beta.map(|v| transform.forward(v)));
        }
        joint
    }

    /// Split a posterior joint matrix back into state and parameters.
    ///
    /// Parameters are inverse-transformed and clipped to their bounds.
    /// The state is clipped to `[0, 1]` and, with `mass_conservation`,
    /// renormalized per node.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] if `parameters` do not have the member count
    /// or transmission width this layout was built for. Nothing is written
    /// to `parameters` from the offending block.
    pub fn split(
        &self,
        joint: &DMatrix<f64>,
        state: &mut EnsembleState,
        parameters: &mut ParameterEnsemble,
        settings: &ParameterSettings,
        mass_conservation: bool,
    ) -> Result<(), ShapeError> {
        let n = self.n_nodes;
        state
            .matrix_mut()
            .copy_from(&joint.columns(0, self.state_width()));
        if mass_conservation {
            state.enforce_mass_conservation();
        } else {
            state.clip_unit_interval();
        }

        let transform = settings.transform;
        let mut offset = self.state_width();
        for &kind in &self.kinds {
            let block = joint.columns(offset, n).map(|v| transform.inverse(v));
            parameters.transition_rates.set_kind_block(kind, &block)?;
            parameters
                .transition_rates
                .clamp_kind(kind, &settings.transition_bounds[kind.index()]);
            offset += n;
        }
        if self.transmission_width > 0 {
            let block = joint
                .columns(offset, self.transmission_width)
                .map(|v| transform.inverse(v));
            let beta = parameters.transmission_rate.matrix_mut();
            if beta.shape() != block.shape() {
                return Err(ShapeError {
                    what: "transmission rate block",
                    expected_rows: block.nrows(),
                    expected_cols: block.ncols(),
                    rows: beta.nrows(),
                    cols: beta.ncols(),
                });
            }
            beta.copy_from(&block);
            parameters
                .transmission_rate
                .clamp(&settings.transmission_bounds);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;
    use contagion_types::{TransitionRateEnsemble, TransmissionRateEnsemble};

    use super::*;

    const RATES: [f64; ClinicalRate::COUNT] = [3.7, 3.2, 10.0, 0.1, 0.01, 0.1];

    fn parameters(members: usize, n: usize) -> ParameterEnsemble {
        ParameterEnsemble {
            transition_rates: TransitionRateEnsemble::uniform(members, n, RATES),
            transmission_rate: TransmissionRateEnsemble::population_wide(members, 12.0),
        }
    }

    fn settings() -> ParameterSettings {
        let mut settings = ParameterSettings {
            learned_kinds: vec![ClinicalRate::LatentPeriod],
            learn_transmission_rate: true,
            transform: ParameterTransform::Log,
            ..ParameterSettings::default()
        };
        settings.transition_bounds[ClinicalRate::LatentPeriod.index()] = ParameterBounds::new(2.0, 5.0);
        settings.transmission_bounds = ParameterBounds::new(1.0, 20.0);
        settings
    }

    #[test]
    fn layout_widths_and_blocks() {
        let layout = JointLayout::new(3, vec![ClinicalRate::LatentPeriod], 1);
        assert_eq!(layout.width(), 18 + 3 + 1);
        assert_eq!(layout.node_block(1), vec![1, 4, 7, 10, 13, 16, 19]);
        assert_eq!(layout.transmission_columns(), vec![21]);

        let per_node = JointLayout::new(2, Vec::new(), 2);
        assert_eq!(per_node.node_block(1), vec![1, 3, 5, 7, 9, 11, 13]);
    }

    #[test]
    fn build_then_split_restores_inputs() {
        let layout = JointLayout::new(2, vec![ClinicalRate::LatentPeriod], 1);
        let state = EnsembleState::uniform(3, 2, 0.1);
        let params = parameters(3, 2);
        let joint = layout.build(&state, &params, ParameterTransform::Log);
        assert_relative_eq!(joint[(0, 12)], 3.7_f64.ln(), epsilon = 1e-12);

        let mut out_state = EnsembleState::uniform(3, 2, 0.0);
        let mut out_params = parameters(3, 2);
        out_params.transmission_rate = TransmissionRateEnsemble::population_wide(3, 1.0);
        layout
            .split(&joint, &mut out_state, &mut out_params, &settings(), true)
            .unwrap();
        assert_relative_eq!(out_state.get(2, Compartment::I, 1), 0.1, epsilon = 1e-12);
        assert_relative_eq!(
            out_params.transition_rates.get(1, ClinicalRate::LatentPeriod, 0),
            3.7,
            epsilon = 1e-9
        );
        assert_relative_eq!(out_params.transmission_rate.rate(0, 0), 12.0, epsilon = 1e-9);
    }

    #[test]
    fn split_clips_parameters_to_bounds() {
        let layout = JointLayout::new(1, vec![ClinicalRate::LatentPeriod], 1);
        let state = EnsembleState::uniform(2, 1, 0.0);
        let mut params = parameters(2, 1);
        let mut joint = layout.build(&state, &params, ParameterTransform::Log);
        joint[(0, 6)] = 100.0_f64.ln();
        joint[(1, 7)] = 0.01_f64.ln();
        let mut out_state = state.clone();
        layout
            .split(&joint, &mut out_state, &mut params, &settings(), true)
            .unwrap();
        assert_relative_eq!(params.transition_rates.get(0, ClinicalRate::LatentPeriod, 0), 5.0);
        assert_relative_eq!(params.transmission_rate.rate(1, 0), 1.0);
    }

    #[test]
    fn split_rejects_a_mismatched_transmission_width() {
        let layout = JointLayout::new(2, Vec::new(), 2);
        let joint = DMatrix::zeros(3, layout.width());
        let mut out_state = EnsembleState::uniform(3, 2, 0.0);
        let mut params = parameters(3, 2);
        let before = params.transmission_rate.clone();

        let err = layout
            .split(&joint, &mut out_state, &mut params, &settings(), true)
            .unwrap_err();
        assert_eq!(err.expected_cols, 2);
        assert_eq!(err.cols, 1);
        assert_eq!(params.transmission_rate, before);
    }
}

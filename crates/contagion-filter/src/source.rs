//! Observation sources: buffering and assimilation for one channel.
//!
//! An [`ObservationSource`] owns everything that is specific to one
//! channel: its cadence and delay in grid steps, its sampling policy and
//! noise model, its joint-matrix layout (which parameters it learns) and
//! a buffer of observations keyed by step. The orchestrator drives every
//! source through the same three calls:
//!
//! - [`ObservationSource::find_and_store_observations`] while predicting,
//! - [`ObservationSource::update`] during backward/forward sweeps,
//! - [`ObservationSource::update_initial_from_series`] for fixed-lag
//!   smoothing of a window start.
//!
//! A missing, empty or not-yet-deliverable batch is a no-op reported
//! through [`AssimilationOutcome::updated`]. Each source draws from its own
//! seeded random stream.

use std::collections::BTreeMap;
use std::ops::Bound;

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::{debug, warn};

use contagion_store::StateSeries;
use contagion_types::{Compartment, EnsembleState, NodeId, ParameterEnsemble, StatusMap, Step, TimeGrid};

use crate::FilterError;
use crate::config::SourceConfig;
use crate::inflation::{inflate_additive, inflate_multiplicative};
use crate::joint::{JointLayout, ParameterSettings};
use crate::localization::{BatchObservations, assimilate_batches};
use crate::observation::{
    Observation, ObservationKind, TestCharacteristics, record_observations, sample_nodes, test_observations,
};

/// The view of the user network a source needs.
pub trait ObservedNetwork {
    /// Full-population identifiers of the user nodes, by user position.
    fn user_nodes(&self) -> &[NodeId];

    /// User positions adjacent to the user position `node`.
    fn neighbors(&self, node: usize) -> Vec<usize>;
}

/// Result of an assimilation call.
#[derive(Debug, Clone, PartialEq)]
pub struct AssimilationOutcome {
    /// Corrected (or unchanged) ensemble state.
    pub state: EnsembleState,
    /// Corrected (or unchanged) parameters.
    pub parameters: ParameterEnsemble,
    /// Whether an update was applied.
    pub updated: bool,
}

impl AssimilationOutcome {
    fn unchanged(state: &EnsembleState, parameters: &ParameterEnsemble) -> Self {
        Self {
            state: state.clone(),
            parameters: parameters.clone(),
            updated: false,
        }
    }
}

/// One observation channel with its buffer and filter configuration.
#[derive(Debug, Clone)]
pub struct ObservationSource {
    /// Source configuration.
    config: SourceConfig,
    /// Simulation time grid.
    grid: TimeGrid,
    /// Cadence in steps.
    interval_steps: i64,
    /// Result delay in steps.
    delay_steps: i64,
    /// Parameter transform and bounds.
    parameters: ParameterSettings,
    /// Joint-matrix layout of this source.
    layout: JointLayout,
    /// Buffered observations by step.
    buffer: BTreeMap<Step, Observation>,
    /// Nodes that tested positive, by step (viral tests).
    positives: BTreeMap<Step, Vec<NodeId>>,
    /// User positions that tested positive at the latest cadence step.
    latest_positive_positions: Vec<usize>,
    /// Random stream for sampling, test results and perturbations.
    rng: SmallRng,
}

impl ObservationSource {
    /// Create a source over `n_nodes` user nodes.
    ///
    /// `transmission_width` is the column count of the transmission-rate
    /// ensemble (1 or `n_nodes`).
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidSource`] for an invalid configuration
    /// or [`FilterError::Time`] if the interval or delay is not a multiple
    /// of the contact interval.
    pub fn new(
        config: SourceConfig,
        grid: TimeGrid,
        parameters: &ParameterSettings,
        n_nodes: usize,
        transmission_width: usize,
        seed: u64,
    ) -> Result<Self, FilterError> {
        config.validate()?;
        let interval_steps = grid.steps_in(config.interval)?;
        if interval_steps <= 0 {
            return Err(FilterError::InvalidSource {
                name: config.name.clone(),
                reason: "interval is shorter than one contact interval".to_owned(),
            });
        }
        let delay_steps = grid.steps_in(config.delay)?;
        let kinds = if config.learn_transition_rates {
            parameters.learned_kinds.clone()
        } else {
            Vec::new()
        };
        let transmission = if config.learn_transmission_rate && parameters.learn_transmission_rate {
            transmission_width
        } else {
            0
        };
        Ok(Self {
            layout: JointLayout::new(n_nodes, kinds, transmission),
            parameters: parameters.clone(),
            config,
            grid,
            interval_steps,
            delay_steps,
            buffer: BTreeMap::new(),
            positives: BTreeMap::new(),
            latest_positive_positions: Vec::new(),
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Source name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Source kind.
    pub const fn kind(&self) -> ObservationKind {
        self.config.kind
    }

    /// Source configuration.
    pub const fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Whether `step` falls on this source's cadence.
    pub const fn is_due(&self, step: Step) -> bool {
        step.is_multiple_of(self.interval_steps)
    }

    /// Whether an observation taken at `observed` may be assimilated at `current`.
    pub const fn delay_satisfied(&self, observed: Step, current: Step) -> bool {
        current.since(observed) >= self.delay_steps
    }

    /// Buffered observation at `step`.
    pub fn observation_at(&self, step: Step) -> Option<&Observation> {
        self.buffer.get(&step)
    }

    /// Number of buffered observation batches.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Nodes that tested positive at `step` (viral tests only).
    pub fn positive_nodes_at(&self, step: Step) -> &[NodeId] {
        self.positives.get(&step).map_or(&[], Vec::as_slice)
    }

    /// Drop buffered observations and positive-test memory before `step`.
    pub fn prune_before(&mut self, step: Step) {
        self.buffer = self.buffer.split_off(&step);
        self.positives = self.positives.split_off(&step);
    }

    /// Sample nodes, draw observations from `truth` and buffer them at `time`.
    ///
    /// Returns the number of observed nodes. The ensemble is only read:
    /// for prevalence (test predictive values) and variance (sampling).
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Time`] if `time` cannot be placed on the grid.
    pub fn find_and_store_observations<N: ObservedNetwork + ?Sized>(
        &mut self,
        state: &EnsembleState,
        truth: &StatusMap,
        network: &N,
        time: f64,
    ) -> Result<usize, FilterError> {
        let step = self.grid.step_of(time)?;
        let compartment = self.config.compartment;
        let user_nodes = network.user_nodes();

        let (nodes, values, variances) = match self.config.kind {
            ObservationKind::Record => record_observations(
                state.n_nodes(),
                compartment,
                truth,
                user_nodes,
                self.config.record_polarity,
                self.config.record_certainty,
                self.config.min_noise_variance,
            ),
            ObservationKind::Sensor | ObservationKind::ViralTest => {
                let nodes = sample_nodes(
                    self.config.sampling,
                    state,
                    compartment,
                    &self.latest_positive_positions,
                    |node| network.neighbors(node),
                    &mut self.rng,
                );
                let test = TestCharacteristics {
                    sensitivity: self.config.sensitivity,
                    specificity: self.config.specificity,
                };
                let (values, variances, positives) = test_observations(
                    &nodes,
                    state,
                    compartment,
                    truth,
                    user_nodes,
                    test,
                    self.config.min_noise_variance,
                    &mut self.rng,
                );
                if self.config.kind == ObservationKind::ViralTest {
                    let ids = positives.iter().filter_map(|&p| user_nodes.get(p).copied()).collect();
                    self.positives.insert(step, ids);
                }
                self.latest_positive_positions = positives;
                (nodes, values, variances)
            }
        };

        let count = nodes.len();
        debug!(
            source = %self.config.name,
            step = step.index(),
            observed = count,
            "Observations stored"
        );
        self.buffer.insert(
            step,
            Observation {
                step,
                time: self.grid.time_of(step),
                source: self.config.name.clone(),
                compartment,
                nodes,
                values,
                variances,
            },
        );
        Ok(count)
    }

    /// Assimilate the batch buffered at `time` into the state and parameters.
    ///
    /// A missing or empty batch, or one whose delay has not elapsed at
    /// `current_time`, leaves everything unchanged with `updated = false`.
    /// `truth`, when given, is only used for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::Time`] if a time cannot be placed on the grid.
    pub fn update<N: ObservedNetwork + ?Sized>(
        &mut self,
        state: &EnsembleState,
        truth: Option<&StatusMap>,
        parameters: &ParameterEnsemble,
        network: &N,
        time: f64,
        current_time: f64,
    ) -> Result<AssimilationOutcome, FilterError> {
        let step = self.grid.step_of(time)?;
        let current = self.grid.step_of(current_time)?;
        let Some(observation) = self.buffer.get(&step).cloned() else {
            debug!(source = %self.config.name, step = step.index(), "No observation buffered");
            return Ok(AssimilationOutcome::unchanged(state, parameters));
        };
        if !self.delay_satisfied(step, current) {
            debug!(
                source = %self.config.name,
                step = step.index(),
                current = current.index(),
                "Observation not yet deliverable"
            );
            return Ok(AssimilationOutcome::unchanged(state, parameters));
        }
        if observation.is_empty() {
            return Ok(AssimilationOutcome::unchanged(state, parameters));
        }
        if let Some(truth) = truth {
            let users = network.user_nodes();
            let truly_in = observation
                .nodes
                .iter()
                .filter(|&&node| {
                    users
                        .get(node)
                        .and_then(|id| truth.get(id))
                        .is_some_and(|&status| status == observation.compartment)
                })
                .count();
            debug!(source = %self.config.name, observed = observation.len(), truly_in, "Assimilating");
        }

        let transform = self.parameters.transform;
        let mut joint = self.layout.build(state, parameters, transform);
        self.inflate(&mut joint);
        let columns: Vec<usize> = observation
            .nodes
            .iter()
            .map(|&node| self.layout.state_column(observation.compartment, node))
            .collect();
        let batch = BatchObservations {
            nodes: &observation.nodes,
            columns: &columns,
            values: &observation.values,
            variances: &observation.variances,
        };
        let settings = self.config.eakf_settings();
        let posterior = assimilate_batches(
            &joint,
            &self.layout,
            &batch,
            self.config.update_type,
            self.config.n_assimilation_batches,
            &settings,
            &|node| network.neighbors(node),
            &mut self.rng,
        );

        let mut new_state = state.clone();
        let mut new_parameters = parameters.clone();
        self.layout.split(
            &posterior,
            &mut new_state,
            &mut new_parameters,
            &self.parameters,
            self.config.mass_conservation,
        )?;
        debug!(
            source = %self.config.name,
            step = step.index(),
            observed = observation.len(),
            "Assimilation update applied"
        );
        Ok(AssimilationOutcome {
            state: new_state,
            parameters: new_parameters,
            updated: true,
        })
    }

    /// Fixed-lag smoothing: correct the state at `window_start` (and the
    /// parameters) from every deliverable observation in
    /// `(window_start, current_time]`.
    ///
    /// The predicted observation for a batch at step `s` is read from the
    /// snapshot `series[s]`; batches without a snapshot are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::MissingSnapshot`] if `series` has no state at
    /// `window_start`, or [`FilterError::Time`] for an off-grid time.
    pub fn update_initial_from_series<N: ObservedNetwork + ?Sized>(
        &mut self,
        series: &StateSeries,
        parameters: &ParameterEnsemble,
        network: &N,
        window_start: f64,
        current_time: f64,
    ) -> Result<AssimilationOutcome, FilterError> {
        let start = self.grid.step_of(window_start)?;
        let current = self.grid.step_of(current_time)?;
        let start_state = series
            .get(start)
            .ok_or(FilterError::MissingSnapshot { time: window_start })?;
        if current <= start {
            return Ok(AssimilationOutcome::unchanged(start_state, parameters));
        }

        let mut eligible: Vec<(&EnsembleState, &Observation)> = Vec::new();
        for (&step, observation) in self
            .buffer
            .range((Bound::Excluded(start), Bound::Included(current)))
        {
            if observation.is_empty() || !self.delay_satisfied(step, current) {
                continue;
            }
            match series.get(step) {
                Some(snapshot) => eligible.push((snapshot, observation)),
                None => warn!(
                    source = %self.config.name,
                    step = step.index(),
                    "No state snapshot for buffered observation, skipping"
                ),
            }
        }
        if eligible.is_empty() {
            debug!(source = %self.config.name, "No deliverable observations in window");
            return Ok(AssimilationOutcome::unchanged(start_state, parameters));
        }

        let width = self.layout.width();
        let total: usize = eligible.iter().map(|(_, o)| o.len()).sum();
        let members = start_state.ensemble_size();
        let base = self.layout.build(start_state, parameters, self.parameters.transform);
        let mut augmented = DMatrix::zeros(members, width + total);
        augmented.columns_mut(0, width).copy_from(&base);

        let mut nodes = Vec::with_capacity(total);
        let mut columns = Vec::with_capacity(total);
        let mut values = Vec::with_capacity(total);
        let mut variances = Vec::with_capacity(total);
        for (snapshot, observation) in &eligible {
            for (k, &node) in observation.nodes.iter().enumerate() {
                let column = width + nodes.len();
                let predicted = snapshot.column_index(observation.compartment, node);
                augmented.set_column(column, &snapshot.matrix().column(predicted));
                nodes.push(node);
                columns.push(column);
                values.push(observation.values[k]);
                variances.push(observation.variances[k]);
            }
        }
        let batches = eligible.len();
        let mut new_state = start_state.clone();
        let mut new_parameters = parameters.clone();

        self.inflate(&mut augmented);
        let batch = BatchObservations {
            nodes: &nodes,
            columns: &columns,
            values: &values,
            variances: &variances,
        };
        let settings = self.config.eakf_settings();
        let posterior = assimilate_batches(
            &augmented,
            &self.layout,
            &batch,
            self.config.update_type,
            self.config.n_assimilation_batches,
            &settings,
            &|node| network.neighbors(node),
            &mut self.rng,
        );
        let corrected = posterior.columns(0, width).into_owned();
        self.layout.split(
            &corrected,
            &mut new_state,
            &mut new_parameters,
            &self.parameters,
            self.config.mass_conservation,
        )?;
        debug!(
            source = %self.config.name,
            window_start,
            batches,
            observed = total,
            "Window start corrected"
        );
        Ok(AssimilationOutcome {
            state: new_state,
            parameters: new_parameters,
            updated: true,
        })
    }

    /// Apply the configured prior inflation to the layout's columns.
    fn inflate(&mut self, joint: &mut DMatrix<f64>) {
        if self.config.inflate_states {
            let columns = if self.config.inflate_infected_only {
                self.layout.compartment_columns(Compartment::I)
            } else {
                self.layout.state_columns()
            };
            inflate_multiplicative(joint, &columns, self.config.inflation);
        }
        let transmission = self.layout.transmission_columns();
        if !transmission.is_empty() {
            inflate_multiplicative(joint, &transmission, self.config.transmission_inflation);
        }
        if self.config.additive_inflation_factor > 0.0 {
            inflate_additive(
                joint,
                &self.layout.state_columns(),
                self.config.additive_inflation_factor,
                &mut self.rng,
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use contagion_types::{
        ClinicalRate, ParameterBounds, ParameterTransform, TransitionRateEnsemble, TransmissionRateEnsemble,
    };
    use rand::Rng;

    use super::*;
    use crate::observation::RecordPolarity;

    const MEMBERS: usize = 12;
    const NODES: usize = 5;
    const RATES: [f64; ClinicalRate::COUNT] = [3.7, 3.2, 10.0, 0.1, 0.01, 0.1];

    /// Users on a line: position `i` is adjacent to `i - 1` and `i + 1`.
    struct LineNetwork {
        users: Vec<NodeId>,
    }

    impl LineNetwork {
        fn new(n: usize) -> Self {
            Self {
                users: (0..n).map(NodeId).collect(),
            }
        }
    }

    impl ObservedNetwork for LineNetwork {
        fn user_nodes(&self) -> &[NodeId] {
            &self.users
        }

        fn neighbors(&self, node: usize) -> Vec<usize> {
            [node.checked_sub(1), Some(node + 1)]
                .into_iter()
                .flatten()
                .filter(|&m| m < self.users.len())
                .collect()
        }
    }

    fn grid() -> TimeGrid {
        TimeGrid::new(0.125).unwrap()
    }

    fn spread_state(seed: u64) -> EnsembleState {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut state = EnsembleState::uniform(MEMBERS, NODES, 0.0);
        for member in 0..MEMBERS {
            for node in 0..NODES {
                let infected = rng.random_range(0.05..0.5);
                state.set(member, Compartment::I, node, infected);
                state.set(member, Compartment::S, node, 1.0 - infected);
            }
        }
        state
    }

    fn parameters(seed: u64) -> ParameterEnsemble {
        let mut rng = SmallRng::seed_from_u64(seed);
        let beta = DMatrix::from_fn(MEMBERS, 1, |_, _| rng.random_range(4.0..16.0));
        ParameterEnsemble {
            transition_rates: TransitionRateEnsemble::uniform(MEMBERS, NODES, RATES),
            transmission_rate: TransmissionRateEnsemble::from_matrix(beta).unwrap(),
        }
    }

    fn all_infected() -> StatusMap {
        (0..NODES).map(|n| (NodeId(n), Compartment::I)).collect()
    }

    fn perfect_test(name: &str) -> SourceConfig {
        let mut config = SourceConfig::new(name, ObservationKind::ViralTest);
        config.interval = 0.125;
        config.sensitivity = 1.0;
        config.specificity = 1.0;
        config
    }

    fn source(config: SourceConfig, settings: &ParameterSettings) -> ObservationSource {
        ObservationSource::new(config, grid(), settings, NODES, 1, 11).unwrap()
    }

    fn mean_infected(state: &EnsembleState) -> f64 {
        state.compartment_mean(Compartment::I).mean()
    }

    #[test]
    fn update_without_observation_is_a_no_op() {
        let mut source = source(perfect_test("tests"), &ParameterSettings::default());
        let state = spread_state(1);
        let params = parameters(2);
        let outcome = source
            .update(&state, None, &params, &LineNetwork::new(NODES), 3.0, 3.0)
            .unwrap();
        assert!(!outcome.updated);
        assert_eq!(outcome.state, state);
        assert_eq!(outcome.parameters, params);
    }

    #[test]
    fn empty_record_batch_is_a_no_op() {
        let mut config = SourceConfig::new("hospital", ObservationKind::Record);
        config.compartment = Compartment::H;
        config.record_polarity = RecordPolarity::Positive;
        let mut source = source(config, &ParameterSettings::default());
        let state = spread_state(1);
        let network = LineNetwork::new(NODES);
        let stored = source
            .find_and_store_observations(&state, &all_infected(), &network, 2.0)
            .unwrap();
        assert_eq!(stored, 0);
        let outcome = source
            .update(&state, None, &parameters(2), &network, 2.0, 2.0)
            .unwrap();
        assert!(!outcome.updated);
        assert_eq!(outcome.state, state);
    }

    #[test]
    fn delayed_results_are_consumed_once_the_delay_elapses() {
        let mut config = perfect_test("tests");
        config.delay = 2.0;
        let mut source = source(config, &ParameterSettings::default());
        let state = spread_state(3);
        let params = parameters(4);
        let network = LineNetwork::new(NODES);
        source
            .find_and_store_observations(&state, &all_infected(), &network, 5.0)
            .unwrap();

        for current in [5.0, 6.0] {
            let outcome = source.update(&state, None, &params, &network, 5.0, current).unwrap();
            assert!(!outcome.updated, "consumed too early at {current}");
        }
        let outcome = source.update(&state, None, &params, &network, 5.0, 7.0).unwrap();
        assert!(outcome.updated);
        assert!(mean_infected(&outcome.state) > mean_infected(&state));
    }

    #[test]
    fn update_conserves_mass_and_respects_bounds() {
        let settings = ParameterSettings {
            learned_kinds: vec![ClinicalRate::LatentPeriod],
            learn_transmission_rate: true,
            transform: ParameterTransform::Log,
            transmission_bounds: ParameterBounds::new(5.0, 15.0),
            ..ParameterSettings::default()
        };
        let mut config = perfect_test("tests");
        config.learn_transmission_rate = true;
        config.learn_transition_rates = true;
        config.inflate_states = true;
        config.inflation = 1.1;
        let mut source = source(config, &settings);
        let state = spread_state(5);
        let params = parameters(6);
        let network = LineNetwork::new(NODES);
        source
            .find_and_store_observations(&state, &all_infected(), &network, 1.0)
            .unwrap();
        let outcome = source
            .update(&state, Some(&all_infected()), &params, &network, 1.0, 1.0)
            .unwrap();

        assert!(outcome.updated);
        assert!(outcome.state.max_mass_error() < 1e-9);
        assert!(outcome.state.matrix().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(
            outcome
                .parameters
                .transmission_rate
                .matrix()
                .iter()
                .all(|&beta| settings.transmission_bounds.contains(beta))
        );
    }

    fn assimilate_once(config: SourceConfig, state: &EnsembleState, params: &ParameterEnsemble) -> AssimilationOutcome {
        let mut source = source(config, &ParameterSettings::default());
        let network = LineNetwork::new(NODES);
        source
            .find_and_store_observations(state, &all_infected(), &network, 1.0)
            .unwrap();
        source.update(state, None, params, &network, 1.0, 1.0).unwrap()
    }

    #[test]
    fn sequential_batches_match_a_single_batch() {
        let state = spread_state(12);
        let params = parameters(13);
        let single = assimilate_once(perfect_test("tests"), &state, &params);

        let mut config = perfect_test("tests");
        config.n_assimilation_batches = 3;
        let batched = assimilate_once(config, &state, &params);

        assert!(batched.updated);
        assert!(batched.state.max_mass_error() < 1e-9);
        assert!(batched.state.matrix().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(mean_infected(&batched.state) > mean_infected(&state));
        assert!((mean_infected(&batched.state) - mean_infected(&single.state)).abs() < 1e-2);
    }

    #[test]
    fn repeating_an_update_barely_moves_the_ensemble() {
        let mut source = source(perfect_test("tests"), &ParameterSettings::default());
        let network = LineNetwork::new(NODES);
        let prior = spread_state(14);
        let params = parameters(15);
        source
            .find_and_store_observations(&prior, &all_infected(), &network, 1.0)
            .unwrap();

        let first = source.update(&prior, None, &params, &network, 1.0, 1.0).unwrap();
        let second = source
            .update(&first.state, None, &first.parameters, &network, 1.0, 1.0)
            .unwrap();

        let first_change = (mean_infected(&first.state) - mean_infected(&prior)).abs();
        let second_change = (mean_infected(&second.state) - mean_infected(&first.state)).abs();
        assert!(first_change > 0.1);
        assert!(second_change < 0.05 * first_change);
        assert!(second.state.max_mass_error() < 1e-9);
    }

    #[test]
    fn viral_tests_remember_positive_nodes() {
        let mut source = source(perfect_test("tests"), &ParameterSettings::default());
        let mut truth = all_infected();
        truth.insert(NodeId(2), Compartment::S);
        source
            .find_and_store_observations(&spread_state(7), &truth, &LineNetwork::new(NODES), 0.5)
            .unwrap();
        let step = grid().step_of(0.5).unwrap();
        assert_eq!(
            source.positive_nodes_at(step),
            &[NodeId(0), NodeId(1), NodeId(3), NodeId(4)]
        );

        source.prune_before(step.next());
        assert!(source.positive_nodes_at(step).is_empty());
        assert_eq!(source.buffered(), 0);
    }

    #[test]
    fn cadence_is_checked_in_steps() {
        let mut config = perfect_test("tests");
        config.interval = 1.0;
        let source = source(config, &ParameterSettings::default());
        assert!(source.is_due(Step(0)));
        assert!(source.is_due(Step(16)));
        assert!(!source.is_due(Step(4)));
    }

    #[test]
    fn off_grid_interval_is_rejected() {
        let mut config = perfect_test("tests");
        config.interval = 0.3;
        let result = ObservationSource::new(config, grid(), &ParameterSettings::default(), NODES, 1, 0);
        assert!(matches!(result, Err(FilterError::Time(_))));
    }

    #[test]
    fn smoothing_requires_a_start_snapshot() {
        let mut source = source(perfect_test("tests"), &ParameterSettings::default());
        let result = source.update_initial_from_series(
            &StateSeries::new(),
            &parameters(1),
            &LineNetwork::new(NODES),
            0.5,
            1.0,
        );
        assert!(matches!(result, Err(FilterError::MissingSnapshot { .. })));
    }

    #[test]
    fn smoothing_corrects_the_window_start() {
        let mut source = source(perfect_test("tests"), &ParameterSettings::default());
        let network = LineNetwork::new(NODES);
        let start = spread_state(8);
        let mut series = StateSeries::new();
        series.record(grid().step_of(0.5).unwrap(), start.clone());
        series.record(grid().step_of(1.0).unwrap(), start.clone());
        let params = parameters(9);

        let idle = source
            .update_initial_from_series(&series, &params, &network, 0.5, 1.0)
            .unwrap();
        assert!(!idle.updated);

        source
            .find_and_store_observations(&start, &all_infected(), &network, 1.0)
            .unwrap();
        let outcome = source
            .update_initial_from_series(&series, &params, &network, 0.5, 1.0)
            .unwrap();
        assert!(outcome.updated);
        assert!(mean_infected(&outcome.state) > mean_infected(&start));
        assert!(outcome.state.max_mass_error() < 1e-9);
    }
}

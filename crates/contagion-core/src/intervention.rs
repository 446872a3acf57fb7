//! Intervention policy: which nodes to isolate or distance, and when.
//!
//! The policy runs after the assimilation phase of a prediction window
//! (and after every spin-up step) whenever its schedule is due. A run has
//! three parts:
//!
//! 1. **Select** nodes according to [`NodeSelection`]. Sick, test and
//!    tracing selections are saved to a history keyed by step and the
//!    nodes in force are the union over the history younger than the
//!    isolation period.
//! 2. **Apply** the [`InterventionType`] to the full contact network (and,
//!    for distancing, the user network).
//! 3. **Record** the selection for the output sink.
//!
//! Selections are full-population [`NodeId`]s.

use std::collections::{BTreeMap, BTreeSet};

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use contagion_store::{StoreError, TimeIndexedNetworkStore};
use contagion_types::{Compartment, ContactNetwork, EnsembleState, NodeId, Step, TimeError, TimeGrid};

use crate::config::InterventionConfig;
use crate::kinetic::UserNetworkProjector;

/// Mean contact duration (days) above which a contact is traced: 15 minutes.
pub const LONG_CONTACT_THRESHOLD: f64 = 1.0 / 96.0;

/// Errors raised by the intervention policy.
#[derive(Debug, thiserror::Error)]
pub enum InterventionError {
    /// Contact tracing needed an interval the store no longer holds.
    #[error("contact tracing failed: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A schedule time could not be placed on the grid.
    #[error("intervention schedule error: {source}")]
    Time {
        /// The underlying grid error.
        #[from]
        source: TimeError,
    },
}

/// When the policy runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionFrequency {
    /// Never.
    #[default]
    Never,
    /// Once, at the start time.
    Once,
    /// At the start time and every interval after it.
    Interval,
}

/// Which nodes the policy selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSelection {
    /// Every node.
    #[default]
    All,
    /// Nodes whose ensemble-mean infection probability exceeds a threshold.
    Sick,
    /// A budgeted uniform draw, refreshed every isolation period.
    Random,
    /// Nodes that tested positive.
    TestDataOnly,
    /// Positive nodes and their long contacts over the trace lookback.
    ContactTracing,
}

impl NodeSelection {
    /// Whether the selection is driven by the assimilated forecast.
    ///
    /// Runs with a selection that is not model based collect observations
    /// but never assimilate them.
    pub const fn is_model_based(self) -> bool {
        matches!(self, Self::All | Self::Sick)
    }

    /// Whether selections accumulate in the history.
    const fn uses_history(self) -> bool {
        matches!(self, Self::Sick | Self::TestDataOnly | Self::ContactTracing)
    }
}

/// What is done to the selected nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    /// Reset every node's contact-rate bounds, then isolate the selection.
    Isolate,
    /// Cap every node's midday contact rate.
    #[default]
    SocialDistance,
    /// Record the selection only.
    Nothing,
}

/// Inputs a selection may draw on.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInputs<'a> {
    /// Current ensemble state.
    pub state: &'a EnsembleState,
    /// Full-population ids of the user positions.
    pub user_nodes: &'a [NodeId],
    /// Nodes that tested positive at the current step.
    pub positives: &'a [NodeId],
    /// Contact-network history.
    pub store: &'a TimeIndexedNetworkStore,
}

/// The intervention policy and its selection history.
#[derive(Debug, Clone)]
pub struct InterventionPolicy {
    /// Configuration.
    config: InterventionConfig,
    /// Simulation time grid.
    grid: TimeGrid,
    /// First step of the run; tracing never looks before it.
    run_start: Step,
    /// First step the policy runs at.
    start_step: Step,
    /// Steps between runs.
    interval_steps: i64,
    /// Steps a selection stays in force.
    isolation_steps: i64,
    /// Steps of contact-trace lookback.
    trace_steps: i64,
    /// Contact-rate bounds nodes return to when isolation is reset.
    baseline_lambdas: (f64, f64),
    /// Selected nodes by step.
    history: BTreeMap<Step, Vec<NodeId>>,
    /// Random stream for the random selection.
    rng: SmallRng,
}

impl InterventionPolicy {
    /// Create a policy.
    ///
    /// # Errors
    ///
    /// Returns [`InterventionError::Time`] if a schedule duration is not a
    /// whole number of contact intervals.
    pub fn new(
        config: InterventionConfig,
        grid: TimeGrid,
        run_start: Step,
        baseline_lambdas: (f64, f64),
        seed: u64,
    ) -> Result<Self, InterventionError> {
        let start_step = Step::new(grid.steps_in(config.start_time)?);
        let interval_steps = grid.steps_in(config.interval)?;
        let isolation_steps = grid.steps_in(config.isolation_period)?;
        let trace_steps = if config.selection == NodeSelection::ContactTracing {
            grid.steps_in(config.contact_trace_days)?
        } else {
            0
        };
        Ok(Self {
            config,
            grid,
            run_start,
            start_step,
            interval_steps,
            isolation_steps,
            trace_steps,
            baseline_lambdas,
            history: BTreeMap::new(),
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Configured node selection.
    pub const fn selection(&self) -> NodeSelection {
        self.config.selection
    }

    /// Whether the selection is driven by the assimilated forecast.
    pub const fn is_model_based(&self) -> bool {
        self.config.selection.is_model_based()
    }

    /// Selected nodes by step.
    pub const fn history(&self) -> &BTreeMap<Step, Vec<NodeId>> {
        &self.history
    }

    /// Whether the schedule fires at `step`.
    pub const fn is_due(&self, step: Step) -> bool {
        match self.config.frequency {
            InterventionFrequency::Never => false,
            InterventionFrequency::Once => step.index() == self.start_step.index(),
            InterventionFrequency::Interval => {
                let since = step.since(self.start_step);
                since >= 0 && Step::new(since).is_multiple_of(self.interval_steps)
            }
        }
    }

    /// User nodes whose ensemble-mean infection probability exceeds the
    /// threshold; exposed counts as infected with `sum_ei`.
    pub fn find_sick(&self, state: &EnsembleState, user_nodes: &[NodeId]) -> Vec<NodeId> {
        let mut probability = state.compartment_mean(Compartment::I);
        if self.config.sum_ei {
            probability += state.compartment_mean(Compartment::E);
        }
        probability
            .iter()
            .enumerate()
            .filter(|(_, p)| **p > self.config.sick_threshold)
            .filter_map(|(position, _)| user_nodes.get(position).copied())
            .collect()
    }

    /// Add a selection to the history.
    pub fn save_nodes_to_intervene(&mut self, step: Step, nodes: Vec<NodeId>) {
        self.history.insert(step, nodes);
    }

    /// Union of the history entries younger than the isolation period.
    pub fn recent_nodes(&self, step: Step) -> Vec<NodeId> {
        let oldest = step.offset(1 - self.isolation_steps);
        let recent: BTreeSet<NodeId> = self
            .history
            .range(oldest..=step)
            .flat_map(|(_, nodes)| nodes.iter().copied())
            .collect();
        recent.into_iter().collect()
    }

    /// Select the nodes to intervene on at `step`.
    ///
    /// # Errors
    ///
    /// Returns [`InterventionError::Store`] if contact tracing needs an
    /// interval the store no longer holds.
    pub fn select(
        &mut self,
        step: Step,
        inputs: &SelectionInputs<'_>,
        network: &ContactNetwork,
    ) -> Result<Vec<NodeId>, InterventionError> {
        let nodes = match self.config.selection {
            NodeSelection::All => {
                let all: Vec<NodeId> = network.nodes().collect();
                self.save_nodes_to_intervene(step, all.clone());
                all
            }
            NodeSelection::Random => {
                let refresh = Step::new(step.since(self.start_step)).is_multiple_of(self.isolation_steps);
                let drawn = match self.history.range(..step).next_back() {
                    Some((_, previous)) if !refresh => previous.clone(),
                    _ => {
                        let n = network.node_count();
                        let mut drawn: Vec<NodeId> = index::sample(&mut self.rng, n, self.config.random_budget.min(n))
                            .into_iter()
                            .map(NodeId)
                            .collect();
                        drawn.sort_unstable();
                        drawn
                    }
                };
                self.save_nodes_to_intervene(step, drawn.clone());
                drawn
            }
            NodeSelection::Sick => {
                let sick = self.find_sick(inputs.state, inputs.user_nodes);
                self.save_nodes_to_intervene(step, sick);
                self.recent_nodes(step)
            }
            NodeSelection::TestDataOnly => {
                self.save_nodes_to_intervene(step, inputs.positives.to_vec());
                self.recent_nodes(step)
            }
            NodeSelection::ContactTracing => {
                let traced = self.trace_contacts(step, inputs.positives, inputs.store)?;
                self.save_nodes_to_intervene(step, traced);
                self.recent_nodes(step)
            }
        };
        debug!(
            step = step.index(),
            selected = nodes.len(),
            accumulates = self.config.selection.uses_history(),
            "Intervention selection"
        );
        Ok(nodes)
    }

    /// Select and apply the intervention at `step`. Returns the number of
    /// selected nodes.
    ///
    /// # Errors
    ///
    /// Returns [`InterventionError::Store`] if contact tracing needs an
    /// interval the store no longer holds.
    pub fn apply(
        &mut self,
        step: Step,
        inputs: &SelectionInputs<'_>,
        network: &mut ContactNetwork,
        user_network: &mut dyn UserNetworkProjector,
    ) -> Result<usize, InterventionError> {
        let nodes = self.select(step, inputs, network)?;
        match self.config.kind {
            InterventionType::Isolate => {
                let (lambda_min, lambda_max) = self.baseline_lambdas;
                network.set_lambdas(lambda_min, lambda_max);
                network.isolate(&nodes, self.config.isolate_lambda);
            }
            InterventionType::SocialDistance => {
                network.set_max_contact_rate(self.config.distanced_max_contact_rate);
                user_network.set_max_contact_rate(self.config.distanced_max_contact_rate);
            }
            InterventionType::Nothing => {}
        }
        info!(
            time = self.grid.time_of(step),
            selection = ?self.config.selection,
            kind = ?self.config.kind,
            selected = nodes.len(),
            population = network.node_count(),
            "Intervention applied"
        );
        Ok(nodes.len())
    }

    /// Positive nodes plus every node they spent longer than
    /// [`LONG_CONTACT_THRESHOLD`] with in any interval of the lookback.
    fn trace_contacts(
        &self,
        step: Step,
        positives: &[NodeId],
        store: &TimeIndexedNetworkStore,
    ) -> Result<Vec<NodeId>, InterventionError> {
        let mut traced: BTreeSet<NodeId> = positives.iter().copied().collect();
        for s in 0..self.trace_steps {
            let trace_step = step.offset(s - self.trace_steps);
            if trace_step < self.run_start {
                continue;
            }
            let record = store.get_network_from_start_time(self.grid.time_of(trace_step))?;
            let weights = record.contact_network.weights();
            for positive in positives {
                traced.extend(
                    weights
                        .row(positive.index())
                        .filter(|&(_, duration)| duration > LONG_CONTACT_THRESHOLD)
                        .map(|(neighbor, _)| NodeId(neighbor)),
                );
            }
        }
        Ok(traced.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;
    use contagion_filter::ObservedNetwork;
    use contagion_types::ContactMatrix;

    use super::*;

    /// User network that only tracks its contact-rate cap.
    struct CappedUsers {
        users: Vec<NodeId>,
        weights: ContactMatrix,
        lambda: Vec<f64>,
        cap: Option<f64>,
    }

    impl CappedUsers {
        fn new(n: usize) -> Self {
            Self {
                users: (0..n).map(NodeId).collect(),
                weights: ContactMatrix::new(n),
                lambda: vec![1.0; n],
                cap: None,
            }
        }
    }

    impl ObservedNetwork for CappedUsers {
        fn user_nodes(&self) -> &[NodeId] {
            &self.users
        }
        fn neighbors(&self, node: usize) -> Vec<usize> {
            self.weights.neighbors(node)
        }
    }

    impl UserNetworkProjector for CappedUsers {
        fn update_from(&mut self, _network: &ContactNetwork) {}
        fn edge_weights(&self) -> &ContactMatrix {
            &self.weights
        }
        fn lambda_integrated(&self) -> &[f64] {
            &self.lambda
        }
        fn set_max_contact_rate(&mut self, lambda_max: f64) {
            self.cap = Some(lambda_max);
        }
    }

    fn grid() -> TimeGrid {
        TimeGrid::new(0.125).unwrap()
    }

    fn policy(config: InterventionConfig) -> InterventionPolicy {
        InterventionPolicy::new(config, grid(), Step(0), (5.0, 22.0), 3).unwrap()
    }

    fn state_with_infection(levels: &[f64]) -> EnsembleState {
        let mut state = EnsembleState::uniform(4, levels.len(), 0.0);
        for member in 0..4 {
            for (node, &level) in levels.iter().enumerate() {
                state.set(member, Compartment::I, node, level);
                state.set(member, Compartment::S, node, 1.0 - level);
            }
        }
        state
    }

    fn empty_store() -> TimeIndexedNetworkStore {
        TimeIndexedNetworkStore::new(grid(), 4).unwrap()
    }

    #[test]
    fn schedule_fires_as_configured() {
        let mut config = InterventionConfig::default();
        assert!(!policy(config.clone()).is_due(Step(0)));

        config.frequency = InterventionFrequency::Once;
        config.start_time = 2.0;
        let once = policy(config.clone());
        assert!(once.is_due(Step(16)));
        assert!(!once.is_due(Step(24)));

        config.frequency = InterventionFrequency::Interval;
        let every_day = policy(config);
        assert!(!every_day.is_due(Step(8)));
        assert!(every_day.is_due(Step(16)));
        assert!(every_day.is_due(Step(24)));
        assert!(!every_day.is_due(Step(25)));
    }

    #[test]
    fn find_sick_applies_the_threshold() {
        let mut config = InterventionConfig {
            sick_threshold: 0.2,
            ..InterventionConfig::default()
        };
        let users = [NodeId(10), NodeId(11), NodeId(12)];
        let mut state = state_with_infection(&[0.1, 0.3, 0.15]);
        assert_eq!(policy(config.clone()).find_sick(&state, &users), vec![NodeId(11)]);

        for member in 0..4 {
            state.set(member, Compartment::E, 2, 0.1);
            state.set(member, Compartment::S, 2, 0.75);
        }
        config.sum_ei = true;
        assert_eq!(
            policy(config).find_sick(&state, &users),
            vec![NodeId(11), NodeId(12)]
        );
    }

    #[test]
    fn history_expires_after_the_isolation_period() {
        let mut policy = policy(InterventionConfig {
            isolation_period: 1.0,
            ..InterventionConfig::default()
        });
        policy.save_nodes_to_intervene(Step(0), vec![NodeId(1)]);
        policy.save_nodes_to_intervene(Step(4), vec![NodeId(2), NodeId(1)]);
        assert_eq!(policy.recent_nodes(Step(7)), vec![NodeId(1), NodeId(2)]);
        assert_eq!(policy.recent_nodes(Step(8)), vec![NodeId(1), NodeId(2)]);
        assert_eq!(policy.recent_nodes(Step(12)), Vec::<NodeId>::new());
    }

    #[test]
    fn random_selection_is_reused_until_the_period_ends() {
        let mut policy = policy(InterventionConfig {
            selection: NodeSelection::Random,
            random_budget: 5,
            isolation_period: 1.0,
            ..InterventionConfig::default()
        });
        let network = ContactNetwork::from_edges(50, [], 5.0, 22.0);
        let state = state_with_infection(&[0.0]);
        let store = empty_store();
        let inputs = SelectionInputs {
            state: &state,
            user_nodes: &[],
            positives: &[],
            store: &store,
        };
        let first = policy.select(Step(0), &inputs, &network).unwrap();
        assert_eq!(first.len(), 5);
        for step in 1..8 {
            assert_eq!(policy.select(Step(step), &inputs, &network).unwrap(), first);
        }
        assert_eq!(policy.select(Step(8), &inputs, &network).unwrap().len(), 5);
    }

    #[test]
    fn contact_tracing_adds_long_contacts_only() {
        let mut policy = policy(InterventionConfig {
            selection: NodeSelection::ContactTracing,
            contact_trace_days: 0.25,
            ..InterventionConfig::default()
        });
        let mut network = ContactNetwork::from_edges(4, [(0, 1), (0, 2)], 5.0, 22.0);
        network.weights_mut().set_weight(0, 1, 0.02);
        network.weights_mut().set_weight(0, 2, 0.001);
        let mut store = empty_store();
        for start in [0.0, 0.125] {
            store.save_network_by_start_time(start, &network).unwrap();
        }
        let state = state_with_infection(&[0.0]);
        let inputs = SelectionInputs {
            state: &state,
            user_nodes: &[],
            positives: &[NodeId(0)],
            store: &store,
        };
        let traced = policy.select(Step(2), &inputs, &network).unwrap();
        assert_eq!(traced, vec![NodeId(0), NodeId(1)]);
    }

    #[test]
    fn contact_tracing_reports_evicted_history() {
        let mut policy = policy(InterventionConfig {
            selection: NodeSelection::ContactTracing,
            contact_trace_days: 0.25,
            ..InterventionConfig::default()
        });
        let network = ContactNetwork::from_edges(2, [(0, 1)], 5.0, 22.0);
        let state = state_with_infection(&[0.0]);
        let store = empty_store();
        let inputs = SelectionInputs {
            state: &state,
            user_nodes: &[],
            positives: &[NodeId(0)],
            store: &store,
        };
        assert!(matches!(
            policy.select(Step(2), &inputs, &network),
            Err(InterventionError::Store { .. })
        ));
    }

    #[test]
    fn isolation_resets_bounds_then_isolates() {
        let mut policy = policy(InterventionConfig {
            selection: NodeSelection::Sick,
            kind: InterventionType::Isolate,
            isolate_lambda: 0.5,
            ..InterventionConfig::default()
        });
        let mut network = ContactNetwork::from_edges(3, [], 1.0, 2.0);
        let mut users = CappedUsers::new(3);
        let state = state_with_infection(&[0.0, 0.9, 0.0]);
        let store = empty_store();
        let user_nodes: Vec<NodeId> = (0..3).map(NodeId).collect();
        let inputs = SelectionInputs {
            state: &state,
            user_nodes: &user_nodes,
            positives: &[],
            store: &store,
        };
        let selected = policy.apply(Step(0), &inputs, &mut network, &mut users).unwrap();
        assert_eq!(selected, 1);
        let (lambda_min, lambda_max) = network.lambdas();
        assert_relative_eq!(lambda_min[0], 5.0);
        assert_relative_eq!(lambda_max[0], 22.0);
        assert_relative_eq!(lambda_min[1], 0.5);
        assert_relative_eq!(lambda_max[1], 0.5);
        assert!(users.cap.is_none());
    }

    #[test]
    fn social_distancing_caps_both_networks() {
        let mut policy = policy(InterventionConfig {
            kind: InterventionType::SocialDistance,
            distanced_max_contact_rate: 8.0,
            ..InterventionConfig::default()
        });
        let mut network = ContactNetwork::from_edges(3, [], 5.0, 22.0);
        let mut users = CappedUsers::new(3);
        let state = state_with_infection(&[0.0]);
        let store = empty_store();
        let inputs = SelectionInputs {
            state: &state,
            user_nodes: &[],
            positives: &[],
            store: &store,
        };
        let selected = policy.apply(Step(0), &inputs, &mut network, &mut users).unwrap();
        assert_eq!(selected, 3);
        assert!(network.lambdas().1.iter().all(|&l| (l - 8.0).abs() < 1e-12));
        assert_eq!(users.cap, Some(8.0));
    }
}

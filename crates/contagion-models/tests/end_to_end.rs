//! Full assimilation runs with the reference collaborators.

#![allow(clippy::unwrap_used)]

use approx::assert_relative_eq;

use contagion_core::{AssimilationConfig, Collaborators, MemorySink, Orchestrator, RunSummary};
use contagion_filter::ObservedNetwork;
use contagion_models::{
    KineticSettings, MasterEquationEnsemble, StochasticKineticModel, SubsetUserNetwork, generate_contact_network,
};

fn config(variant: &str) -> AssimilationConfig {
    AssimilationConfig::parse(&format!(
        r"
run:
  name: end-to-end
  seed: 5
time:
  static_contact_interval: 0.125
  total_time: 5.0
windows:
  variant: {variant}
  da_window: 1.0
  prediction_window: 1.0
  n_spin_up_windows: 3
  n_backward_steps: 2
ensemble:
  ensemble_size: 10
  initial_infected_fraction: 0.05
parameters:
  learn_transmission_rate: true
  transmission_bounds: {{ min: 1.0, max: 40.0 }}
population:
  n_nodes: 80
  user_fraction: 0.5
  mean_degree: 6.0
  initial_infected: 8
sources:
  - name: tests
    kind: viral_test
    interval: 1.0
    sampling: {{ policy: random, budget: 20 }}
    learn_transmission_rate: true
  - name: hospital
    kind: record
    interval: 0.5
    compartment: H
"
    ))
    .unwrap()
}

fn run(config: &AssimilationConfig) -> (RunSummary, Orchestrator) {
    let population = &config.population;
    let network = generate_contact_network(
        population.n_nodes,
        population.mean_degree,
        population.lambda_min,
        population.lambda_max,
        config.run.seed,
    );
    let users = SubsetUserNetwork::random(&network, population.user_fraction, config.run.seed).unwrap();
    let settings = KineticSettings {
        transmission_rate: population.transmission_rate,
        clinical: population.clinical.to_array(),
        ..KineticSettings::default()
    };
    let kinetic =
        StochasticKineticModel::new(population.n_nodes, settings, population.initial_infected, 0.0, config.run.seed)
            .unwrap();
    let stepper = MasterEquationEnsemble::new(
        config.ensemble.ensemble_size,
        users.len(),
        config.parameters.prior_clinical.to_array(),
        config.parameters.prior_transmission_rate,
    );
    let collaborators = Collaborators {
        stepper: Box::new(stepper),
        kinetic: Box::new(kinetic),
        user_network: Box::new(users),
        sink: Box::new(MemorySink::new()),
    };
    let mut orchestrator = Orchestrator::new(config, network, collaborators).unwrap();
    let summary = orchestrator.run().unwrap();
    (summary, orchestrator)
}

#[test]
fn backward_forward_run_completes_with_valid_ensembles() {
    let config = config("backward_forward");
    let (summary, orchestrator) = run(&config);

    assert_eq!(summary.windows, 2);
    assert_eq!(summary.steps, 40);
    assert_relative_eq!(summary.final_time, 5.0, epsilon = 1e-9);
    assert_relative_eq!(summary.kinetic_time, 5.0, epsilon = 1e-9);
    assert_eq!(summary.final_counts.total(), 40);

    let context = orchestrator.context();
    assert!(context.ensemble_state.max_mass_error() < 1e-6);
    let rates = context.parameters.transmission_rate.matrix();
    assert!(rates.iter().all(|&r| (1.0..=40.0).contains(&r)));
    assert_eq!(context.series.len(), 41);
}

#[test]
fn iterated_forward_run_completes_with_valid_ensembles() {
    let config = config("iterated_forward");
    let (summary, orchestrator) = run(&config);

    assert_relative_eq!(summary.final_time, 5.0, epsilon = 1e-9);
    let context = orchestrator.context();
    assert!(context.ensemble_state.max_mass_error() < 1e-6);
    assert!(
        context
            .parameters
            .transmission_rate
            .matrix()
            .iter()
            .all(|&r| (1.0..=40.0).contains(&r))
    );
    assert_eq!(context.series.len(), 41);
    assert_eq!(context.status_trace.len(), 40);
}

#[test]
fn user_projection_matches_the_forecast_width() {
    let config = config("backward_forward");
    let (_, orchestrator) = run(&config);
    let context = orchestrator.context();
    assert_eq!(context.ensemble_state.n_nodes(), 40);
    let users = SubsetUserNetwork::random(&context.network, 0.5, config.run.seed).unwrap();
    assert_eq!(users.user_nodes().len(), context.ensemble_state.n_nodes());
}

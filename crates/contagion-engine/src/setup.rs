//! Reference population wiring.
//!
//! Builds the collaborators the orchestrator runs with from the
//! `population` and `parameters` sections of the configuration: a random
//! contact network, a random user subset, the stochastic kinetic model as
//! ground truth and the master-equation ensemble as forecast stepper.

use tracing::info;

use contagion_core::{AssimilationConfig, Collaborators, OutputSink};
use contagion_models::{
    KineticSettings, MasterEquationEnsemble, StochasticKineticModel, SubsetUserNetwork, generate_contact_network,
};
use contagion_types::ContactNetwork;

use crate::error::EngineError;

/// Seed offset of the contact-network draw.
const NETWORK_SEED_OFFSET: u64 = 10;
/// Seed offset of the user-subset draw.
const USER_SEED_OFFSET: u64 = 11;
/// Seed offset of the kinetic model.
const KINETIC_SEED_OFFSET: u64 = 12;

/// Everything the orchestrator is constructed from.
pub struct Assembly {
    /// The initial full contact network.
    pub network: ContactNetwork,
    /// Stepper, kinetic model, user network and sink.
    pub collaborators: Collaborators,
    /// Nodes the forecast covers.
    pub n_users: usize,
}

/// Build the reference population and wire it to `sink`.
pub fn assemble(config: &AssimilationConfig, sink: Box<dyn OutputSink>) -> Result<Assembly, EngineError> {
    let population = &config.population;
    let seed = config.run.seed;

    let network = generate_contact_network(
        population.n_nodes,
        population.mean_degree,
        population.lambda_min,
        population.lambda_max,
        seed.wrapping_add(NETWORK_SEED_OFFSET),
    );
    let users = SubsetUserNetwork::random(&network, population.user_fraction, seed.wrapping_add(USER_SEED_OFFSET))?;
    let n_users = users.len();

    let settings = KineticSettings {
        transmission_rate: population.transmission_rate,
        clinical: population.clinical.to_array(),
        ..KineticSettings::default()
    };
    let kinetic = StochasticKineticModel::new(
        population.n_nodes,
        settings,
        population.initial_infected,
        config.time.start_time,
        seed.wrapping_add(KINETIC_SEED_OFFSET),
    )?;
    let stepper = MasterEquationEnsemble::new(
        config.ensemble.ensemble_size,
        n_users,
        config.parameters.prior_clinical.to_array(),
        config.parameters.prior_transmission_rate,
    );

    info!(
        nodes = population.n_nodes,
        users = n_users,
        edges = network.weights().edge_count(),
        initial_infected = population.initial_infected,
        "Reference population assembled"
    );

    Ok(Assembly {
        network,
        collaborators: Collaborators {
            stepper: Box::new(stepper),
            kinetic: Box::new(kinetic),
            user_network: Box::new(users),
            sink,
        },
        n_users,
    })
}

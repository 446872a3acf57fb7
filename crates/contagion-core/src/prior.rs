//! Prior ensembles drawn at the start of a run.
//!
//! Every member starts from the configured infected fraction and clinical
//! values, perturbed multiplicatively by `exp(spread * z)` with standard
//! normal `z`. Only learned parameters are perturbed: a parameter the
//! filter never corrects stays at its prior value in every member.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use contagion_types::{
    ClinicalRate, Compartment, EnsembleState, ParameterEnsemble, TransitionRateEnsemble,
    TransmissionRateEnsemble,
};

use crate::config::{EnsembleConfig, ParametersConfig};

/// Draw the initial forecast state over `n_users` user nodes.
///
/// Each member and node is susceptible except for an infectious fraction
/// drawn around `initial_infected_fraction`.
pub fn initial_state(config: &EnsembleConfig, n_users: usize, seed: u64) -> EnsembleState {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut state = EnsembleState::uniform(config.ensemble_size, n_users, 0.0);
    for member in 0..state.ensemble_size() {
        for node in 0..n_users {
            let infected = perturb(config.initial_infected_fraction, config.initial_spread, &mut rng).min(1.0);
            state.set(member, Compartment::I, node, infected);
            state.set(member, Compartment::S, node, 1.0 - infected);
        }
    }
    state
}

/// Draw the prior parameter ensemble over `n_users` user nodes.
pub fn initial_parameters(
    config: &ParametersConfig,
    ensemble_size: usize,
    n_users: usize,
    seed: u64,
) -> ParameterEnsemble {
    let mut rng = SmallRng::seed_from_u64(seed);
    let settings = config.settings();

    let mut transition_rates =
        TransitionRateEnsemble::uniform(ensemble_size, n_users, config.prior_clinical.to_array());
    for &kind in &settings.learned_kinds {
        let prior = config.prior_clinical.to_array()[kind.index()];
        let bounds = settings.transition_bounds[kind.index()];
        for member in 0..transition_rates.ensemble_size() {
            for node in 0..n_users {
                let value = bounds.clamp(perturb(prior, config.prior_spread, &mut rng));
                transition_rates.set(member, kind, node, value);
            }
        }
    }

    let mut transmission_rate = if config.per_node_transmission {
        TransmissionRateEnsemble::per_node(ensemble_size, n_users, config.prior_transmission_rate)
    } else {
        TransmissionRateEnsemble::population_wide(ensemble_size, config.prior_transmission_rate)
    };
    if config.learn_transmission_rate {
        let prior = config.prior_transmission_rate;
        transmission_rate
            .matrix_mut()
            .apply(|v| *v = perturb(prior, config.prior_spread, &mut rng));
        transmission_rate.clamp(&settings.transmission_bounds);
    }

    ParameterEnsemble {
        transition_rates,
        transmission_rate,
    }
}

/// Clinical values of the ensemble as a plain array, averaged over members
/// and nodes.
pub fn mean_clinical_values(rates: &TransitionRateEnsemble) -> [f64; ClinicalRate::COUNT] {
    let means = rates.network_means().row_mean();
    let mut values = [0.0; ClinicalRate::COUNT];
    for kind in ClinicalRate::ALL {
        values[kind.index()] = means[kind.index()];
    }
    values
}

fn perturb(value: f64, spread: f64, rng: &mut SmallRng) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    value * (spread * z).exp()
}

//! Stochastic SEIHRD kinetics on the full contact network.
//!
//! Each call to [`run`](KineticSimulator::run) covers one static contact
//! interval:
//!
//! 1. Every node's contact rate is averaged over the interval of the diurnal
//!    cycle `λ(t) = λ_min + (λ_max - λ_min) (1 - cos 2πt) / 2`.
//! 2. Every edge draws its contacts: a Poisson number at the smaller of its
//!    endpoints' rates, each lasting an exponential time. The realized mean
//!    contact duration becomes the edge weight of the returned network.
//! 3. Statuses advance in sub-steps. A node fires a transition with
//!    probability `1 - exp(-rate * h)`; susceptible nodes are infected at
//!    `β * (contact time with infectious neighbors) / interval`.
//!
//! The model is the synthetic ground truth the forecast is scored against.

use std::f64::consts::TAU;

use rand::rngs::SmallRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, Poisson};
use tracing::debug;

use contagion_core::{KineticError, KineticSimulator};
use contagion_types::{ClinicalRate, Compartment, CompartmentCounts, ContactMatrix, ContactNetwork, NodeId, StatusMap};

use crate::error::ModelError;
use crate::rates::TransitionRates;

/// Two minutes, in days.
pub const DEFAULT_MEAN_CONTACT_LIFETIME: f64 = 2.0 / 1440.0;

/// Slack below which a stop time counts as the current time.
const TIME_TOLERANCE: f64 = 1e-9;

/// Parameters of the ground-truth epidemic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KineticSettings {
    /// Infection rate per day of contact with an infectious node.
    pub transmission_rate: f64,
    /// Clinical quantities, indexed by [`ClinicalRate::index`].
    pub clinical: [f64; ClinicalRate::COUNT],
    /// Mean length of one contact, in days.
    pub mean_contact_lifetime: f64,
    /// Longest status sub-step, in days.
    pub max_substep: f64,
}

impl Default for KineticSettings {
    fn default() -> Self {
        Self {
            transmission_rate: 12.0,
            clinical: [3.7, 3.2, 5.0, 0.1, 0.001, 0.1],
            mean_contact_lifetime: DEFAULT_MEAN_CONTACT_LIFETIME,
            max_substep: 1.0 / 96.0,
        }
    }
}

/// Mean of the diurnal contact rate over `[t0, t1]`, times in days.
pub fn diurnal_mean_rate(lambda_min: f64, lambda_max: f64, t0: f64, t1: f64) -> f64 {
    let amplitude = 0.5 * (lambda_max - lambda_min);
    let span = t1 - t0;
    if span <= TIME_TOLERANCE {
        return lambda_min + amplitude * (1.0 - (TAU * t0).cos());
    }
    let mean_cos = ((TAU * t1).sin() - (TAU * t0).sin()) / (TAU * span);
    lambda_min + amplitude * (1.0 - mean_cos)
}

/// Ground-truth stochastic simulator over the full population.
#[derive(Debug, Clone)]
pub struct StochasticKineticModel {
    /// Epidemic parameters.
    settings: KineticSettings,
    /// Rates derived from the clinical quantities.
    rates: TransitionRates,
    /// Status of every node.
    statuses: StatusMap,
    /// Simulator clock.
    time: f64,
    /// Random stream.
    rng: SmallRng,
}

impl StochasticKineticModel {
    /// Create a model over `n_nodes` susceptible nodes with
    /// `initial_infected` of them, drawn at random, infectious at `start_time`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::TooManySeeds`] if `initial_infected > n_nodes`.
    pub fn new(
        n_nodes: usize,
        settings: KineticSettings,
        initial_infected: usize,
        start_time: f64,
        seed: u64,
    ) -> Result<Self, ModelError> {
        if initial_infected > n_nodes {
            return Err(ModelError::TooManySeeds {
                requested: initial_infected,
                population: n_nodes,
            });
        }
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut statuses: StatusMap = (0..n_nodes).map(|i| (NodeId(i), Compartment::S)).collect();
        for i in index::sample(&mut rng, n_nodes, initial_infected) {
            statuses.insert(NodeId(i), Compartment::I);
        }
        Ok(Self {
            settings,
            rates: TransitionRates::from_clinical(&settings.clinical),
            statuses,
            time: start_time,
            rng,
        })
    }

    /// Compartment counts over the whole population.
    pub fn counts(&self) -> CompartmentCounts {
        CompartmentCounts::of_all(&self.statuses)
    }

    /// Draw the contacts of one edge over an interval in which
    /// `expected_contacts` are expected. Returns the mean contact duration
    /// per expected contact and the total contact time.
    fn draw_contacts(&mut self, expected_contacts: f64) -> (f64, f64) {
        if expected_contacts <= 0.0 {
            return (0.0, 0.0);
        }
        let Ok(poisson) = Poisson::new(expected_contacts) else {
            return (0.0, 0.0);
        };
        let count: f64 = poisson.sample(&mut self.rng);
        if count < 1.0 {
            return (0.0, 0.0);
        }
        let Ok(durations) = Gamma::new(count, self.settings.mean_contact_lifetime) else {
            return (0.0, 0.0);
        };
        let total: f64 = durations.sample(&mut self.rng);
        (total / expected_contacts, total)
    }

    /// Advance every status over an interval of length `interval` given the
    /// total contact time of every edge.
    fn advance(&mut self, contact_time: &ContactMatrix, interval: f64) {
        let beta = self.settings.transmission_rate;
        let rates = self.rates;
        let mut remaining = interval;
        while remaining > TIME_TOLERANCE {
            let h = remaining.min(self.settings.max_substep);
            let infectious: Vec<bool> = self.statuses.values().map(|&s| s == Compartment::I).collect();

            let mut transitions = Vec::new();
            for (&node, &status) in &self.statuses {
                let next = match status {
                    Compartment::S => {
                        let exposure: f64 = contact_time
                            .row(node.index())
                            .filter(|&(neighbor, _)| infectious.get(neighbor).copied().unwrap_or(false))
                            .map(|(_, time)| time)
                            .sum();
                        fires(&mut self.rng, beta * exposure / interval, h).then_some(Compartment::E)
                    }
                    Compartment::E => fires(&mut self.rng, rates.sigma, h).then_some(Compartment::I),
                    Compartment::I => fires(&mut self.rng, rates.gamma, h).then(|| {
                        let u: f64 = self.rng.random();
                        if u < rates.hospitalization {
                            Compartment::H
                        } else if u < rates.hospitalization + rates.community_mortality {
                            Compartment::D
                        } else {
                            Compartment::R
                        }
                    }),
                    Compartment::H => fires(&mut self.rng, rates.gamma_hospital, h).then(|| {
                        if self.rng.random::<f64>() < rates.hospital_mortality {
                            Compartment::D
                        } else {
                            Compartment::R
                        }
                    }),
                    Compartment::R | Compartment::D => None,
                };
                if let Some(next) = next {
                    transitions.push((node, next));
                }
            }
            self.statuses.extend(transitions);
            remaining -= h;
        }
    }
}

/// Whether an exponential clock at `rate` fires within `h`.
fn fires(rng: &mut SmallRng, rate: f64, h: f64) -> bool {
    let probability = -(-rate * h).exp_m1();
    rng.random::<f64>() < probability
}

impl KineticSimulator for StochasticKineticModel {
    fn run(&mut self, stop_time: f64, network: &ContactNetwork) -> Result<ContactNetwork, KineticError> {
        if network.node_count() != self.statuses.len() {
            return Err(KineticError::NodeCount {
                expected: self.statuses.len(),
                found: network.node_count(),
            });
        }
        let interval = stop_time - self.time;
        if interval < -TIME_TOLERANCE {
            return Err(KineticError::StopTimeInPast {
                stop_time,
                current_time: self.time,
            });
        }
        if interval <= TIME_TOLERANCE {
            return Ok(network.clone());
        }

        let (lambda_min, lambda_max) = network.lambdas();
        let lambda: Vec<f64> = lambda_min
            .iter()
            .zip(lambda_max)
            .map(|(&lo, &hi)| diurnal_mean_rate(lo, hi, self.time, stop_time))
            .collect();

        let mut realized = network.clone();
        let mut contact_time = ContactMatrix::new(network.node_count());
        for (a, b, _) in network.weights().edges() {
            let (duration, total) = self.draw_contacts(lambda[a].min(lambda[b]) * interval);
            realized.weights_mut().set_weight(a, b, duration);
            contact_time.set_weight(a, b, total);
        }
        realized.set_lambda_integrated(lambda);

        self.advance(&contact_time, interval);
        self.time = stop_time;

        let counts = self.counts();
        debug!(
            time = self.time,
            susceptible = counts.get(Compartment::S),
            infectious = counts.get(Compartment::I),
            hospitalized = counts.get(Compartment::H),
            deceased = counts.get(Compartment::D),
            "Kinetic interval complete"
        );
        Ok(realized)
    }

    fn current_statuses(&self) -> &StatusMap {
        &self.statuses
    }

    fn time(&self) -> f64 {
        self.time
    }
}

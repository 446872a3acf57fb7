//! Mean-field SEIHRD master equations for an ensemble of forecasts.
//!
//! Every member evolves the compartment probabilities of every user node:
//!
//! ```text
//! S' = -η S
//! E' =  η S - σ E
//! I' =  σ E - γ I
//! H' =  h γ I - γ' H
//! R' =  (1 - h - d) γ I + (1 - d') γ' H
//! D' =  d γ I + d' γ' H
//! ```
//!
//! with infection hazard `η_i = β_i Σ_j min(λ_i, λ_j) W_ij I_j`, where `W`
//! holds mean contact durations and `λ` the diurnally averaged activation
//! rates. Integration is explicit Euler; backward integration uses a
//! negative step and renormalizes every node afterwards.

use std::time::{Duration, Instant};

use nalgebra::DMatrix;
use tracing::debug;

use contagion_core::{ForecastStepper, StepperError};
use contagion_types::{
    ClinicalRate, Compartment, ContactMatrix, EnsembleState, ParameterEnsemble, ShapeError, TransitionRateEnsemble,
    TransmissionRateEnsemble,
};

use crate::rates::TransitionRates;

/// Ensemble solver of the master equations over a fixed user population.
#[derive(Debug, Clone)]
pub struct MasterEquationEnsemble {
    /// Number of user nodes.
    n_nodes: usize,
    /// Current ensemble state.
    state: EnsembleState,
    /// Per-member parameters.
    parameters: ParameterEnsemble,
    /// Transition rates per member and node, derived from `parameters`.
    rates: Vec<Vec<TransitionRates>>,
    /// Mean contact durations between user nodes.
    contact_duration: ContactMatrix,
    /// Diurnally averaged activation rate per user node.
    activation_rate: Vec<f64>,
    /// Solver clock.
    time: f64,
    /// Time spent evaluating the right-hand side since the last reset.
    walltime_eval_closure: Duration,
}

impl MasterEquationEnsemble {
    /// Create a solver over `n_nodes` user nodes with every member fully
    /// susceptible and sharing the given clinical quantities and
    /// transmission rate.
    pub fn new(
        ensemble_size: usize,
        n_nodes: usize,
        clinical: [f64; ClinicalRate::COUNT],
        transmission_rate: f64,
    ) -> Self {
        let parameters = ParameterEnsemble {
            transition_rates: TransitionRateEnsemble::uniform(ensemble_size, n_nodes, clinical),
            transmission_rate: TransmissionRateEnsemble::population_wide(ensemble_size, transmission_rate),
        };
        let mut solver = Self {
            n_nodes,
            state: EnsembleState::uniform(ensemble_size, n_nodes, 0.0),
            rates: Vec::new(),
            parameters,
            contact_duration: ContactMatrix::new(n_nodes),
            activation_rate: vec![0.0; n_nodes],
            time: 0.0,
            walltime_eval_closure: Duration::ZERO,
        };
        solver.rates = solver.derive_rates();
        solver
    }

    /// The current ensemble state.
    pub const fn state(&self) -> &EnsembleState {
        &self.state
    }

    fn ensemble_size(&self) -> usize {
        self.state.ensemble_size()
    }

    fn derive_rates(&self) -> Vec<Vec<TransitionRates>> {
        let rates = &self.parameters.transition_rates;
        (0..rates.ensemble_size())
            .map(|member| {
                (0..self.n_nodes)
                    .map(|node| {
                        let clinical = ClinicalRate::ALL.map(|kind| rates.get(member, kind, node));
                        TransitionRates::from_clinical(&clinical)
                    })
                    .collect()
            })
            .collect()
    }

    /// Time derivative of the whole ensemble.
    fn derivative(&self) -> DMatrix<f64> {
        let n = self.n_nodes;
        let values = self.state.matrix();
        let column = |c: Compartment, node: usize| c.index() * n + node;
        let mut derivative = DMatrix::zeros(values.nrows(), values.ncols());

        for member in 0..self.ensemble_size() {
            for node in 0..n {
                let rates = &self.rates[member][node];
                let lambda = self.activation_rate[node];
                let pressure: f64 = self
                    .contact_duration
                    .row(node)
                    .map(|(neighbor, duration)| {
                        lambda.min(self.activation_rate[neighbor])
                            * duration
                            * values[(member, column(Compartment::I, neighbor))]
                    })
                    .sum();
                let hazard = self.parameters.transmission_rate.rate(member, node) * pressure;

                let s = values[(member, column(Compartment::S, node))];
                let e = values[(member, column(Compartment::E, node))];
                let i = values[(member, column(Compartment::I, node))];
                let h = values[(member, column(Compartment::H, node))];

                let infection = hazard * s;
                let onset = rates.sigma * e;
                derivative[(member, column(Compartment::S, node))] = -infection;
                derivative[(member, column(Compartment::E, node))] = infection - onset;
                derivative[(member, column(Compartment::I, node))] = onset - rates.gamma * i;
                derivative[(member, column(Compartment::H, node))] =
                    rates.infected_to_hospitalized() * i - rates.gamma_hospital * h;
                derivative[(member, column(Compartment::R, node))] =
                    rates.infected_to_resistant() * i + rates.hospitalized_to_resistant() * h;
                derivative[(member, column(Compartment::D, node))] =
                    rates.infected_to_deceased() * i + rates.hospitalized_to_deceased() * h;
            }
        }
        derivative
    }

    /// Integrate over `dt` (negative for backwards) in `steps` Euler steps.
    fn integrate(&mut self, dt: f64, steps: usize) -> Result<EnsembleState, StepperError> {
        let steps = steps.max(1);
        let h = dt / steps as f64;
        for _ in 0..steps {
            let started = Instant::now();
            let derivative = self.derivative();
            self.walltime_eval_closure += started.elapsed();

            *self.state.matrix_mut() += derivative * h;
            self.time += h;
            if self.state.matrix().iter().any(|v| !v.is_finite()) {
                return Err(StepperError::Diverged { time: self.time });
            }
            self.state.clip_unit_interval();
        }
        if dt < 0.0 {
            self.state.enforce_mass_conservation();
        }
        debug!(time = self.time, steps, backwards = dt < 0.0, "Master equations integrated");
        Ok(self.state.clone())
    }

    const fn check_nodes(&self, found: usize) -> Result<(), StepperError> {
        if found == self.n_nodes {
            Ok(())
        } else {
            Err(StepperError::NodeCount {
                expected: self.n_nodes,
                found,
            })
        }
    }

    fn check_members(&self, what: &'static str, values: &DMatrix<f64>) -> Result<(), StepperError> {
        if values.nrows() == self.ensemble_size() {
            Ok(())
        } else {
            Err(ShapeError {
                what,
                expected_rows: self.ensemble_size(),
                expected_cols: values.ncols(),
                rows: values.nrows(),
                cols: values.ncols(),
            }
            .into())
        }
    }
}

impl ForecastStepper for MasterEquationEnsemble {
    fn simulate(&mut self, dt: f64, min_steps: usize) -> Result<EnsembleState, StepperError> {
        self.integrate(dt, min_steps)
    }

    fn simulate_backwards(&mut self, dt: f64, min_steps: usize) -> Result<EnsembleState, StepperError> {
        self.integrate(-dt, min_steps)
    }

    fn set_states_ensemble(&mut self, state: &EnsembleState) -> Result<(), StepperError> {
        self.check_nodes(state.n_nodes())?;
        self.check_members("ensemble state", state.matrix())?;
        self.state = state.clone();
        Ok(())
    }

    fn set_start_time(&mut self, time: f64) {
        self.time = time;
    }

    fn set_mean_contact_duration(&mut self, weights: &ContactMatrix) -> Result<(), StepperError> {
        self.check_nodes(weights.dim())?;
        self.contact_duration = weights.clone();
        Ok(())
    }

    fn set_diurnally_averaged_nodal_activation_rate(&mut self, rates: &[f64]) -> Result<(), StepperError> {
        self.check_nodes(rates.len())?;
        self.activation_rate = rates.to_vec();
        Ok(())
    }

    fn update_ensemble(&mut self, parameters: &ParameterEnsemble) -> Result<(), StepperError> {
        let transition = &parameters.transition_rates;
        self.check_nodes(transition.n_nodes())?;
        self.check_members("transition rates", transition.matrix())?;
        self.check_members("transmission rate", parameters.transmission_rate.matrix())?;
        if parameters.transmission_rate.is_per_node() {
            self.check_nodes(parameters.transmission_rate.width())?;
        }
        self.parameters = parameters.clone();
        self.rates = self.derive_rates();
        Ok(())
    }

    fn reset_walltimes(&mut self) {
        self.walltime_eval_closure = Duration::ZERO;
    }

    fn walltime_eval_closure(&self) -> Duration {
        self.walltime_eval_closure
    }

    fn current_time(&self) -> f64 {
        self.time
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    const CLINICAL: [f64; ClinicalRate::COUNT] = [3.7, 3.2, 5.0, 0.1, 0.001, 0.1];

    /// Three nodes in a line, each node in contact with its neighbors.
    fn solver(infected: f64) -> MasterEquationEnsemble {
        let mut solver = MasterEquationEnsemble::new(4, 3, CLINICAL, 12.0);
        let mut weights = ContactMatrix::new(3);
        weights.set_weight(0, 1, 0.01);
        weights.set_weight(1, 2, 0.01);
        solver.set_mean_contact_duration(&weights).unwrap();
        solver.set_diurnally_averaged_nodal_activation_rate(&[13.5; 3]).unwrap();
        solver
            .set_states_ensemble(&EnsembleState::uniform(4, 3, infected))
            .unwrap();
        solver
    }

    #[test]
    fn forward_step_conserves_mass_and_infects_neighbors() {
        let mut solver = solver(0.1);
        let state = solver.simulate(0.125, 4).unwrap();

        assert!(state.max_mass_error() < 1e-9);
        assert!(state.get(0, Compartment::E, 1) > 0.0);
        assert!(state.get(0, Compartment::S, 1) < 0.9);
        assert_relative_eq!(solver.current_time(), 0.125, epsilon = 1e-12);
    }

    #[test]
    fn without_infection_nothing_happens() {
        let mut solver = solver(0.0);
        let state = solver.simulate(1.0, 8).unwrap();
        assert_relative_eq!(state.get(2, Compartment::S, 0), 1.0);
    }

    #[test]
    fn backwards_approximately_inverts_forwards() {
        let mut solver = solver(0.2);
        let start = solver.state().clone();
        solver.simulate(0.125, 16).unwrap();
        let back = solver.simulate_backwards(0.125, 16).unwrap();

        let error = (back.matrix() - start.matrix()).abs().max();
        assert!(error < 1e-3, "round trip error {error}");
        assert!(back.max_mass_error() < 1e-9);
        assert_relative_eq!(solver.current_time(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn higher_transmission_infects_faster() {
        let mut slow = solver(0.1);
        let mut fast = solver(0.1);
        let parameters = ParameterEnsemble {
            transition_rates: TransitionRateEnsemble::uniform(4, 3, CLINICAL),
            transmission_rate: TransmissionRateEnsemble::population_wide(4, 40.0),
        };
        fast.update_ensemble(&parameters).unwrap();

        let slow_state = slow.simulate(0.5, 8).unwrap();
        let fast_state = fast.simulate(0.5, 8).unwrap();
        assert!(fast_state.get(0, Compartment::E, 1) > slow_state.get(0, Compartment::E, 1));
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let mut solver = solver(0.1);
        assert!(matches!(
            solver.set_mean_contact_duration(&ContactMatrix::new(5)),
            Err(StepperError::NodeCount { expected: 3, found: 5 })
        ));
        assert!(matches!(
            solver.set_states_ensemble(&EnsembleState::uniform(2, 3, 0.1)),
            Err(StepperError::Shape { .. })
        ));
        let per_node_wrong = ParameterEnsemble {
            transition_rates: TransitionRateEnsemble::uniform(4, 3, CLINICAL),
            transmission_rate: TransmissionRateEnsemble::per_node(4, 7, 12.0),
        };
        assert!(solver.update_ensemble(&per_node_wrong).is_err());
    }

    #[test]
    fn reset_zeroes_the_walltime() {
        let mut solver = solver(0.1);
        solver.simulate(0.125, 2).unwrap();
        solver.reset_walltimes();
        assert_eq!(solver.walltime_eval_closure(), Duration::ZERO);
    }
}

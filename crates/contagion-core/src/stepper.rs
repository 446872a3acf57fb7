//! The forecast ensemble stepper contract.
//!
//! The orchestrator never integrates the ensemble itself. It hands the
//! stepper the current contact durations and activation rates, asks it to
//! advance (or rewind) one contact interval, and re-adopts the returned
//! state. Implementations must be deterministic given the state, the
//! parameters, the contact matrix and `dt`.

use std::time::Duration;

use contagion_types::{ContactMatrix, EnsembleState, ParameterEnsemble, ShapeError};

/// Errors raised by a forecast stepper.
#[derive(Debug, thiserror::Error)]
pub enum StepperError {
    /// A state, parameter or contact matrix had the wrong shape.
    #[error("stepper input rejected: {source}")]
    Shape {
        /// The underlying shape error.
        #[from]
        source: ShapeError,
    },

    /// The contact matrix or rate vector covers a different node count.
    #[error("stepper expects {expected} nodes, got {found}")]
    NodeCount {
        /// Nodes the stepper was built for.
        expected: usize,
        /// Nodes supplied.
        found: usize,
    },

    /// The integration produced a non-finite value.
    #[error("ensemble integration diverged at time {time}")]
    Diverged {
        /// Time at which the divergence was detected.
        time: f64,
    },
}

/// A solver that advances an ensemble of forecast states through time.
///
/// [`simulate_backwards`] approximately inverts [`simulate`] for the same
/// inputs.
///
/// [`simulate`]: ForecastStepper::simulate
/// [`simulate_backwards`]: ForecastStepper::simulate_backwards
pub trait ForecastStepper {
    /// Advance by `dt` using at least `min_steps` internal sub-steps and
    /// return the new ensemble state.
    fn simulate(&mut self, dt: f64, min_steps: usize) -> Result<EnsembleState, StepperError>;

    /// Rewind by `dt` using at least `min_steps` internal sub-steps and
    /// return the new ensemble state.
    fn simulate_backwards(&mut self, dt: f64, min_steps: usize) -> Result<EnsembleState, StepperError>;

    /// Replace the ensemble state.
    fn set_states_ensemble(&mut self, state: &EnsembleState) -> Result<(), StepperError>;

    /// Set the solver's clock.
    fn set_start_time(&mut self, time: f64);

    /// Set the mean contact durations of the user network.
    fn set_mean_contact_duration(&mut self, weights: &ContactMatrix) -> Result<(), StepperError>;

    /// Set the diurnally averaged activation rate of every user node.
    fn set_diurnally_averaged_nodal_activation_rate(&mut self, rates: &[f64]) -> Result<(), StepperError>;

    /// Replace the per-member parameters.
    fn update_ensemble(&mut self, parameters: &ParameterEnsemble) -> Result<(), StepperError>;

    /// Zero the walltime counters.
    fn reset_walltimes(&mut self);

    /// Walltime spent evaluating the right-hand side since the last reset.
    fn walltime_eval_closure(&self) -> Duration;

    /// The solver's clock.
    fn current_time(&self) -> f64;
}

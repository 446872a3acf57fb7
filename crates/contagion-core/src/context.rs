//! Forecast clock and the mutable state of one run.
//!
//! The clock is the single source of truth for forecast time. It moves one
//! contact interval per forecast step (forwards while predicting, backwards
//! during backward sweeps) and is checked against the window schedule and
//! the kinetic clock at every window boundary.
//!
//! Time is accumulated in floating point, the way the stepper sees it, and
//! snapped to the exact grid value at each window start. Drift larger than
//! one contact interval is a [`ConsistencyError`] carrying both timestamps.

use contagion_store::{StateSeries, TimeIndexedNetworkStore};
use contagion_types::{
    CompartmentCounts, ContactNetwork, EnsembleState, ParameterEnsemble, StatusMap, Step, TimeError,
    TimeGrid,
};

use crate::config::WindowPlan;
use crate::series::ReportingSeries;

/// Forecast time disagrees with the schedule or the kinetic clock.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{what}: expected time {expected}, forecast clock at {actual}")]
pub struct ConsistencyError {
    /// Which check failed.
    pub what: &'static str,
    /// Time the check expected.
    pub expected: f64,
    /// Forecast time found.
    pub actual: f64,
}

/// Forecast-time cursor on the contact-interval grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastClock {
    /// The time grid.
    grid: TimeGrid,
    /// Current forecast time in days.
    time: f64,
}

impl ForecastClock {
    /// Create a clock at `start_time`.
    pub const fn new(grid: TimeGrid, start_time: f64) -> Self {
        Self {
            grid,
            time: start_time,
        }
    }

    /// Current forecast time.
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Grid step nearest to the current time.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::OutOfRange`] if the time has left the grid.
    pub fn step(&self) -> Result<Step, TimeError> {
        self.grid.step_of(self.time)
    }

    /// Move one contact interval forwards.
    pub fn advance(&mut self) {
        self.time += self.grid.interval();
    }

    /// Move one contact interval backwards.
    pub fn rewind(&mut self) {
        self.time -= self.grid.interval();
    }

    /// Check that the clock is within one contact interval of `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError`] naming `what` when it is not.
    pub fn check(&self, what: &'static str, expected: f64) -> Result<(), ConsistencyError> {
        if TimeGrid::are_close(self.time, expected, self.grid.interval()) {
            Ok(())
        } else {
            Err(ConsistencyError {
                what,
                expected,
                actual: self.time,
            })
        }
    }

    /// [`check`](Self::check), then set the clock to exactly `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError`] naming `what` when the clock has drifted
    /// by more than one contact interval.
    pub fn snap_to(&mut self, what: &'static str, expected: f64) -> Result<(), ConsistencyError> {
        self.check(what, expected)?;
        self.time = expected;
        Ok(())
    }
}

/// Everything a run mutates, owned in one place and borrowed into each phase.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    /// Step counts of the run.
    pub plan: WindowPlan,
    /// Forecast time.
    pub clock: ForecastClock,
    /// Canonical forecast ensemble.
    pub ensemble_state: EnsembleState,
    /// Canonical parameter ensemble.
    pub parameters: ParameterEnsemble,
    /// Forecast snapshots by step, for fixed-lag smoothing.
    pub state_series: StateSeries,
    /// Contact-network history.
    pub store: TimeIndexedNetworkStore,
    /// Full-population network the kinetic model runs on next.
    pub network: ContactNetwork,
    /// Kinetic statuses at the kinetic clock.
    pub kinetic_statuses: StatusMap,
    /// Per-step reporting series.
    pub series: ReportingSeries,
    /// Kinetic compartment counts of the user nodes after every step.
    pub status_trace: Vec<CompartmentCounts>,
}

impl SimulationContext {
    /// Time of a step on the run's grid.
    pub fn time_of(&self, step: Step) -> f64 {
        self.plan.grid.time_of(step)
    }

    /// Contact interval of the run.
    pub const fn dt(&self) -> f64 {
        self.plan.grid.interval()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn clock() -> ForecastClock {
        ForecastClock::new(TimeGrid::new(0.125).unwrap(), 2.0)
    }

    #[test]
    fn advance_and_rewind_move_one_interval() {
        let mut clock = clock();
        clock.advance();
        clock.advance();
        clock.rewind();
        assert_relative_eq!(clock.time(), 2.125);
        assert_eq!(clock.step().unwrap(), Step(17));
    }

    #[test]
    fn eight_steps_land_on_the_next_day() {
        let mut clock = clock();
        for _ in 0..8 {
            clock.advance();
        }
        clock.snap_to("window start", 3.0).unwrap();
        assert_relative_eq!(clock.time(), 3.0);
    }

    #[test]
    fn drift_beyond_one_interval_is_reported() {
        let mut clock = clock();
        clock.advance();
        clock.advance();
        let err = clock.snap_to("window start", 2.0).unwrap_err();
        assert_eq!(err.what, "window start");
        assert_relative_eq!(err.expected, 2.0);
        assert_relative_eq!(err.actual, 2.25);
        assert_relative_eq!(clock.time(), 2.25);
    }
}

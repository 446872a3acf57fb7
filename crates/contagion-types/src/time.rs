//! Step indices and the fixed simulation time grid.
//!
//! Simulation time is a floating-point number of days, but every event the
//! engine schedules happens on a multiple of the static contact interval.
//! The [`TimeGrid`] converts times into integer [`Step`] indices once, with a
//! tolerance check, and everything downstream (store lookups, observation
//! buffers, cadence checks, state series) keys on steps.
//!
//! # Conversions
//!
//! - The grid is anchored at time zero, so a step is a multiple of the
//!   interval in absolute time and "is `t` a multiple of the cadence" is an
//!   integer remainder.
//! - Conversions that cannot be represented (non-finite input, a duration
//!   that is not an integer number of intervals) are errors, never silently
//!   rounded.

use serde::{Deserialize, Serialize};

/// Relative tolerance used when checking that a duration is an integer
/// number of contact intervals.
const MULTIPLE_TOLERANCE: f64 = 1e-6;

/// Errors raised by time-grid conversions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeError {
    /// The contact interval is not a positive finite number.
    #[error("invalid contact interval: {interval}")]
    InvalidInterval {
        /// The rejected interval.
        interval: f64,
    },

    /// A time or duration is not finite or does not fit the step range.
    #[error("time {time} cannot be placed on the grid")]
    OutOfRange {
        /// The rejected time.
        time: f64,
    },

    /// A duration is not an integer multiple of the contact interval.
    #[error("duration {duration} is not a multiple of the contact interval {interval}")]
    NotAMultiple {
        /// The rejected duration.
        duration: f64,
        /// The grid's contact interval.
        interval: f64,
    },
}

/// Index of a grid point: time `step * interval`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Step(pub i64);

impl Step {
    /// Create a step from its raw index.
    pub const fn new(index: i64) -> Self {
        Self(index)
    }

    /// Return the raw index.
    pub const fn index(self) -> i64 {
        self.0
    }

    /// Return the step `delta` grid points later (earlier for negative `delta`).
    pub const fn offset(self, delta: i64) -> Self {
        Self(self.0.saturating_add(delta))
    }

    /// Return the next grid point.
    pub const fn next(self) -> Self {
        self.offset(1)
    }

    /// Return the previous grid point.
    pub const fn prev(self) -> Self {
        self.offset(-1)
    }

    /// Number of steps from `earlier` to `self` (negative if `earlier` is later).
    pub const fn since(self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Whether this step falls on a cadence of `every` steps.
    ///
    /// A cadence of zero never fires.
    pub const fn is_multiple_of(self, every: i64) -> bool {
        if every <= 0 {
            return false;
        }
        self.0.rem_euclid(every) == 0
    }
}

impl core::fmt::Display for Step {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "step {}", self.0)
    }
}

/// Fixed time grid with spacing equal to the static contact interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeGrid {
    /// Grid spacing in days.
    interval: f64,
}

impl TimeGrid {
    /// Create a grid with the given contact interval (days).
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidInterval`] if the interval is not a
    /// positive finite number.
    pub fn new(interval: f64) -> Result<Self, TimeError> {
        if !interval.is_finite() || interval <= 0.0 {
            return Err(TimeError::InvalidInterval { interval });
        }
        Ok(Self { interval })
    }

    /// Return the grid spacing.
    pub const fn interval(&self) -> f64 {
        self.interval
    }

    /// Tolerance used when matching a time to a grid point: half an interval.
    pub fn tolerance(&self) -> f64 {
        self.interval / 2.0
    }

    /// Time of a grid point.
    pub fn time_of(&self, step: Step) -> f64 {
        step.0 as f64 * self.interval
    }

    /// The grid point nearest to `time`.
    ///
    /// Rounding to the nearest index places every finite time within the
    /// half-interval tolerance of exactly one step.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::OutOfRange`] if `time` is not finite or does
    /// not fit the index range.
    pub fn step_of(&self, time: f64) -> Result<Step, TimeError> {
        let raw = (time / self.interval).round();
        to_index(raw, time).map(Step)
    }

    /// Number of whole intervals in `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::NotAMultiple`] if `duration` is not an integer
    /// number of intervals, or [`TimeError::OutOfRange`] if it is not finite.
    pub fn steps_in(&self, duration: f64) -> Result<i64, TimeError> {
        let ratio = duration / self.interval;
        let rounded = ratio.round();
        if (ratio - rounded).abs() > MULTIPLE_TOLERANCE * rounded.abs().max(1.0) {
            return Err(TimeError::NotAMultiple {
                duration,
                interval: self.interval,
            });
        }
        to_index(rounded, duration)
    }

    /// Whether two times agree within `eps`.
    pub fn are_close(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps
    }
}

/// Convert a rounded ratio into a step index, rejecting values outside the
/// range an `i64` index can hold.
#[allow(clippy::cast_possible_truncation)]
fn to_index(rounded: f64, original: f64) -> Result<i64, TimeError> {
    // 2^53: beyond this, f64 no longer represents every integer.
    const LIMIT: f64 = 9_007_199_254_740_992.0;
    if !rounded.is_finite() || rounded.abs() > LIMIT {
        return Err(TimeError::OutOfRange { time: original });
    }
    // Range-checked and integral above.
    Ok(rounded as i64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn grid() -> TimeGrid {
        TimeGrid::new(0.125).unwrap()
    }

    #[test]
    fn rejects_non_positive_interval() {
        assert!(TimeGrid::new(0.0).is_err());
        assert!(TimeGrid::new(-1.0).is_err());
        assert!(TimeGrid::new(f64::NAN).is_err());
    }

    #[test]
    fn step_of_rounds_within_half_interval() {
        let grid = grid();
        assert_eq!(grid.step_of(1.0).unwrap(), Step(8));
        assert_eq!(grid.step_of(1.05).unwrap(), Step(8));
        assert_eq!(grid.step_of(1.07).unwrap(), Step(9));
        assert_eq!(grid.step_of(-0.125).unwrap(), Step(-1));
    }

    #[test]
    fn accumulated_float_error_maps_to_the_same_step() {
        let grid = grid();
        let mut time = 0.0;
        for _ in 0..80 {
            time += 0.1;
        }
        // 80 * 0.1 accumulates error but still lands on day 8.
        assert_eq!(grid.step_of(time).unwrap(), Step(64));
    }

    #[test]
    fn time_of_inverts_step_of() {
        let grid = grid();
        assert_relative_eq!(grid.time_of(Step(56)), 7.0);
        assert_eq!(grid.step_of(grid.time_of(Step(-3))).unwrap(), Step(-3));
    }

    #[test]
    fn steps_in_requires_integer_multiples() {
        let grid = grid();
        assert_eq!(grid.steps_in(7.0).unwrap(), 56);
        assert_eq!(grid.steps_in(1.0).unwrap(), 8);
        assert!(matches!(grid.steps_in(0.3), Err(TimeError::NotAMultiple { .. })));
        assert!(matches!(grid.steps_in(f64::INFINITY), Err(TimeError::OutOfRange { .. })));
    }

    #[test]
    fn cadence_uses_absolute_steps() {
        assert!(Step(16).is_multiple_of(8));
        assert!(!Step(12).is_multiple_of(8));
        assert!(Step(-8).is_multiple_of(8));
        assert!(!Step(8).is_multiple_of(0));
    }

    #[test]
    fn step_arithmetic() {
        let step = Step(10);
        assert_eq!(step.next(), Step(11));
        assert_eq!(step.prev(), Step(9));
        assert_eq!(step.offset(-4), Step(6));
        assert_eq!(step.since(Step(4)), 6);
    }
}

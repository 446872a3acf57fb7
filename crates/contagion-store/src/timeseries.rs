//! Pre-sized buffer of per-step ensemble snapshots.
//!
//! Each snapshot is an `ensemble_size x width` matrix (compartment fractions,
//! mean transition rates, a scalar transmission rate). The buffer is sized
//! to the run's planned step count up front; one push more is an
//! [`TimeSeriesError::Overflow`].

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use contagion_types::ShapeError;

use crate::TimeSeriesError;

/// Fixed-capacity sequence of ensemble snapshots, indexed by push order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleTimeSeries {
    /// Rows per snapshot.
    ensemble_size: usize,
    /// Columns per snapshot.
    width: usize,
    /// Planned number of steps.
    capacity: usize,
    /// Snapshots pushed so far.
    snapshots: Vec<DMatrix<f64>>,
}

impl EnsembleTimeSeries {
    /// Create an empty series of `ensemble_size x width` snapshots with room
    /// for `capacity` steps.
    pub fn new(ensemble_size: usize, width: usize, capacity: usize) -> Self {
        Self {
            ensemble_size,
            width,
            capacity,
            snapshots: Vec::with_capacity(capacity),
        }
    }

    /// Append a snapshot at the next free step.
    ///
    /// # Errors
    ///
    /// Returns [`TimeSeriesError::Overflow`] once `capacity` snapshots are
    /// stored, or [`TimeSeriesError::Shape`] for a snapshot of the wrong shape.
    pub fn push_back(&mut self, snapshot: DMatrix<f64>) -> Result<(), TimeSeriesError> {
        if self.snapshots.len() >= self.capacity {
            return Err(TimeSeriesError::Overflow {
                capacity: self.capacity,
            });
        }
        if snapshot.shape() != (self.ensemble_size, self.width) {
            return Err(ShapeError {
                what: "time series snapshot",
                expected_rows: self.ensemble_size,
                expected_cols: self.width,
                rows: snapshot.nrows(),
                cols: snapshot.ncols(),
            }
            .into());
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Ensemble mean of every stored snapshot: `len x width`.
    pub fn get_mean(&self) -> DMatrix<f64> {
        let mut mean = DMatrix::zeros(self.snapshots.len(), self.width);
        for (step, snapshot) in self.snapshots.iter().enumerate() {
            mean.row_mut(step).copy_from(&snapshot.row_mean());
        }
        mean
    }

    /// Snapshot at push position `index`.
    pub fn get(&self, index: usize) -> Option<&DMatrix<f64>> {
        self.snapshots.get(index)
    }

    /// All snapshots in push order.
    pub fn snapshots(&self) -> &[DMatrix<f64>] {
        &self.snapshots
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Planned number of steps.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Columns per snapshot.
    pub const fn width(&self) -> usize {
        self.width
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn push_beyond_capacity_overflows() {
        let mut series = EnsembleTimeSeries::new(2, 3, 2);
        series.push_back(DMatrix::zeros(2, 3)).unwrap();
        series.push_back(DMatrix::zeros(2, 3)).unwrap();
        let result = series.push_back(DMatrix::zeros(2, 3));
        assert!(matches!(result, Err(TimeSeriesError::Overflow { capacity: 2 })));
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let mut series = EnsembleTimeSeries::new(2, 3, 5);
        let result = series.push_back(DMatrix::zeros(3, 2));
        assert!(matches!(result, Err(TimeSeriesError::Shape(_))));
        assert!(series.is_empty());
    }

    #[test]
    fn mean_reduces_over_members() {
        let mut series = EnsembleTimeSeries::new(2, 1, 3);
        series
            .push_back(DMatrix::from_row_slice(2, 1, &[1.0, 3.0]))
            .unwrap();
        series
            .push_back(DMatrix::from_row_slice(2, 1, &[4.0, 6.0]))
            .unwrap();
        let mean = series.get_mean();
        assert_eq!(mean.shape(), (2, 1));
        assert_relative_eq!(mean[(0, 0)], 2.0);
        assert_relative_eq!(mean[(1, 0)], 5.0);
    }

    #[test]
    fn serializes_to_json() {
        let mut series = EnsembleTimeSeries::new(1, 2, 1);
        series.push_back(DMatrix::from_row_slice(1, 2, &[0.5, 0.5])).unwrap();
        let json = serde_json::to_string(&series).unwrap();
        let back: EnsembleTimeSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(back, series);
    }
}

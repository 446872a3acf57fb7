//! Bounded network history and ensemble series storage for the Contagion engine.
//!
//! # Architecture
//!
//! - [`network_store`] -- [`TimeIndexedNetworkStore`]: the most recent
//!   contact-network intervals with their boundary statuses, keyed by step.
//! - [`timeseries`] -- [`EnsembleTimeSeries`]: a pre-sized append buffer of
//!   per-step ensemble snapshots handed to persistence.
//! - [`state_series`] -- [`StateSeries`]: ensemble states recorded by step
//!   for fixed-lag smoothing, last write wins.
//!
//! Nothing in this crate panics; every lookup or capacity failure is a
//! [`StoreError`] or [`TimeSeriesError`].

pub mod network_store;
pub mod state_series;
pub mod timeseries;

pub use network_store::{IntervalRecord, TimeIndexedNetworkStore};
pub use state_series::StateSeries;
pub use timeseries::EnsembleTimeSeries;

use contagion_types::{ShapeError, TimeError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by the network store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No stored interval has a boundary at the requested time.
    #[error("no stored interval with a boundary at time {time}")]
    MissingInterval {
        /// The requested boundary time.
        time: f64,
    },

    /// Storing a new interval would evict one still inside the active
    /// lookback window.
    #[error("evicting interval starting at {evicted_start} would cross the lookback floor {floor}")]
    LookbackEviction {
        /// Start time of the interval that would have been evicted.
        evicted_start: f64,
        /// Start of the active lookback window.
        floor: f64,
    },

    /// The store was created with room for no intervals.
    #[error("network store capacity must be at least one interval")]
    ZeroCapacity,

    /// A time could not be placed on the grid.
    #[error("time grid error: {0}")]
    Time(#[from] TimeError),
}

/// Errors raised by the ensemble time series.
#[derive(Debug, thiserror::Error)]
pub enum TimeSeriesError {
    /// More snapshots were pushed than the run planned for.
    #[error("time series overflow: capacity {capacity} steps already filled")]
    Overflow {
        /// Planned number of steps.
        capacity: usize,
    },

    /// A snapshot did not have the series' shape.
    #[error("snapshot rejected: {0}")]
    Shape(#[from] ShapeError),
}

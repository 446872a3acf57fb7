//! Ensemble adjustment Kalman filter and observation sources.
//!
//! # Architecture
//!
//! - [`eakf`] -- the filter core on a plain ensemble matrix: Kalman gain,
//!   deterministic square-root or perturbed-observation member update,
//!   Cholesky with pseudo-inverse fallback.
//! - [`inflation`] -- multiplicative and additive prior inflation.
//! - [`joint`] -- [`JointLayout`]: how state and learned parameters are laid
//!   out side by side in one joint matrix, with transforms and bounds.
//! - [`localization`] -- global, local and neighbor updates in sequential
//!   sub-batches.
//! - [`observation`] -- sampling policies, test and record noise models.
//! - [`source`] -- [`ObservationSource`]: one channel's buffer, cadence,
//!   delay and its three assimilation entry points.
//! - [`config`] -- [`SourceConfig`], one entry of the `sources` list.
//!
//! # Errors
//!
//! - Numeric ill-conditioning is absorbed (truncated eigenvalues, noise
//!   floors) and never surfaces as an error.
//! - "Nothing to assimilate" is reported through an update flag. Errors are
//!   reserved for bad configuration and broken time or index invariants.

pub mod config;
pub mod eakf;
pub mod inflation;
pub mod joint;
pub mod localization;
pub mod observation;
pub mod source;

pub use config::SourceConfig;
pub use eakf::{EakfSettings, UpdateMethod, eakf_update};
pub use joint::{JointLayout, ParameterSettings};
pub use localization::UpdateType;
pub use observation::{Observation, ObservationKind, RecordPolarity, SamplingPolicy};
pub use source::{AssimilationOutcome, ObservationSource, ObservedNetwork};

use contagion_types::{ShapeError, TimeError};

/// Errors raised by observation sources.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// A source configuration failed validation.
    #[error("invalid source '{name}': {reason}")]
    InvalidSource {
        /// Source name.
        name: String,
        /// What is wrong.
        reason: String,
    },

    /// Smoothing was asked to correct a window start with no recorded state.
    #[error("no ensemble state recorded at window start {time}")]
    MissingSnapshot {
        /// The window start time.
        time: f64,
    },

    /// A time could not be placed on the grid.
    #[error("time grid error: {0}")]
    Time(#[from] TimeError),

    /// The parameter ensemble does not fit the source's joint layout.
    #[error("joint layout mismatch: {0}")]
    Shape(#[from] ShapeError),
}

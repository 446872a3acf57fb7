//! Shared type definitions for the Contagion epidemic forecasting engine.
//!
//! This crate is the single source of truth for the data model used across
//! the workspace: compartments and clinical rates, node identifiers and
//! status maps, contact networks, the ensemble state matrix, the parameter
//! ensembles learned by data assimilation, and the fixed time grid that
//! turns floating-point simulation times into step indices.
//!
//! # Modules
//!
//! - [`enums`] -- Compartments, clinical rate kinds, parameter transforms
//! - [`ids`] -- Type-safe node identifiers
//! - [`time`] -- [`Step`] indices and the [`TimeGrid`]
//! - [`status`] -- Node status maps and compartment counts
//! - [`network`] -- Contact networks and sparse contact-duration matrices
//! - [`ensemble`] -- The ensemble state matrix and mass conservation
//! - [`parameters`] -- Transition-rate and transmission-rate ensembles

pub mod enums;
pub mod ensemble;
pub mod ids;
pub mod network;
pub mod parameters;
pub mod status;
pub mod time;

pub use enums::{ClinicalRate, Compartment, ParameterTransform};
pub use ensemble::{EnsembleState, ShapeError};
pub use ids::NodeId;
pub use network::{ContactMatrix, ContactNetwork};
pub use parameters::{ParameterBounds, ParameterEnsemble, TransitionRateEnsemble, TransmissionRateEnsemble};
pub use status::{CompartmentCounts, StatusMap};
pub use time::{Step, TimeError, TimeGrid};

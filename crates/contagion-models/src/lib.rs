//! Reference epidemic collaborators for the Contagion engine.
//!
//! The orchestrator in `contagion-core` only talks to traits. This crate
//! provides the implementations the engine binary runs with:
//!
//! - [`network`] -- random contact-network generation.
//! - [`kinetic`] -- [`StochasticKineticModel`], the synthetic ground truth.
//! - [`master_equation`] -- [`MasterEquationEnsemble`], the forecast stepper.
//! - [`user_network`] -- [`SubsetUserNetwork`], the user projection.
//! - [`rates`] -- clinical quantities to transition rates, shared by both
//!   models.

pub mod error;
pub mod kinetic;
pub mod master_equation;
pub mod network;
pub mod rates;
pub mod user_network;

pub use error::ModelError;
pub use kinetic::{KineticSettings, StochasticKineticModel};
pub use master_equation::MasterEquationEnsemble;
pub use network::generate_contact_network;
pub use rates::TransitionRates;
pub use user_network::SubsetUserNetwork;

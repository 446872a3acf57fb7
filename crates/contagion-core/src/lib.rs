//! Configuration, collaborator contracts and sweep orchestration for the
//! Contagion forecasting engine.
//!
//! This crate owns the state machine of a data assimilation run: spin-up,
//! prediction windows in lockstep with the kinetic model, backward/forward
//! or iterated-forward assimilation sweeps, and scheduled interventions.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `contagion-config.yaml` into
//!   strongly-typed structs, validated into a [`WindowPlan`].
//! - [`context`] -- [`ForecastClock`] and the [`SimulationContext`] every
//!   phase borrows.
//! - [`stepper`] -- [`ForecastStepper`], the forecast ensemble solver.
//! - [`kinetic`] -- [`KineticSimulator`] and [`UserNetworkProjector`].
//! - [`sink`] -- [`OutputSink`] artifacts and the in-memory sink.
//! - [`prior`] -- Prior state and parameter ensembles.
//! - [`series`] -- Per-step [`ReportingSeries`].
//! - [`intervention`] -- Node selection and contact-rate interventions.
//! - [`orchestrator`] -- The [`Orchestrator`] itself.
//!
//! [`WindowPlan`]: config::WindowPlan
//! [`ForecastClock`]: context::ForecastClock
//! [`SimulationContext`]: context::SimulationContext
//! [`ForecastStepper`]: stepper::ForecastStepper
//! [`KineticSimulator`]: kinetic::KineticSimulator
//! [`UserNetworkProjector`]: kinetic::UserNetworkProjector
//! [`OutputSink`]: sink::OutputSink
//! [`ReportingSeries`]: series::ReportingSeries
//! [`Orchestrator`]: orchestrator::Orchestrator

pub mod config;
pub mod context;
pub mod intervention;
pub mod kinetic;
pub mod orchestrator;
pub mod prior;
pub mod series;
pub mod sink;
pub mod stepper;

pub use config::{AssimilationConfig, ConfigError, WindowPlan};
pub use context::{ConsistencyError, ForecastClock, SimulationContext};
pub use intervention::{InterventionPolicy, InterventionType, NodeSelection};
pub use kinetic::{KineticError, KineticSimulator, UserNetworkProjector};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorError, RunSummary, SweepVariant};
pub use sink::{Artifact, MemorySink, OutputSink, SinkError};
pub use stepper::{ForecastStepper, StepperError};

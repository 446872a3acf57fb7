//! Configuration loading and typed config structures for the Contagion engine.
//!
//! The canonical configuration lives in `contagion-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror the
//! YAML structure, a loader, and [`AssimilationConfig::validate`], which
//! checks the cross-field invariants the orchestrator relies on and derives
//! the step counts of the run as a [`WindowPlan`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use contagion_filter::{ParameterSettings, SourceConfig};
use contagion_types::{ClinicalRate, ParameterBounds, ParameterTransform, Step, TimeError, TimeGrid};

use crate::intervention::{InterventionFrequency, InterventionType, NodeSelection};
use crate::orchestrator::SweepVariant;

/// Environment variable that overrides `run.output_dir`.
pub const OUTPUT_DIR_ENV: &str = "CONTAGION_OUTPUT_DIR";

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A time or duration does not fit the contact-interval grid.
    #[error("time grid error: {source}")]
    Time {
        /// The underlying grid error.
        #[from]
        source: TimeError,
    },

    /// A cross-field invariant does not hold.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

/// Top-level configuration of one assimilation run.
///
/// Mirrors the structure of `contagion-config.yaml`. Every section has
/// defaults, so an empty file describes a small prior run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssimilationConfig {
    /// Run identity, seed and output location.
    #[serde(default)]
    pub run: RunConfig,

    /// Time grid and run length.
    #[serde(default)]
    pub time: TimeConfig,

    /// Window lengths and sweep schedule.
    #[serde(default)]
    pub windows: WindowConfig,

    /// Ensemble size and initial state.
    #[serde(default)]
    pub ensemble: EnsembleConfig,

    /// Learned parameters, priors and bounds.
    #[serde(default)]
    pub parameters: ParametersConfig,

    /// Observation sources.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Intervention schedule and policy.
    #[serde(default)]
    pub intervention: InterventionConfig,

    /// Reference population for the bundled collaborators.
    #[serde(default)]
    pub population: PopulationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AssimilationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CONTAGION_OUTPUT_DIR` overrides `run.output_dir` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.run.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.run.apply_env_overrides();
        Ok(config)
    }

    /// The simulation time grid.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Time`] for a non-positive contact interval.
    pub fn grid(&self) -> Result<TimeGrid, ConfigError> {
        Ok(TimeGrid::new(self.time.static_contact_interval)?)
    }

    /// Check every cross-field invariant and derive the run's step counts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated invariant,
    /// or [`ConfigError::Time`] when a duration is not a whole number of
    /// contact intervals.
    pub fn validate(&self) -> Result<WindowPlan, ConfigError> {
        let grid = self.grid()?;
        let windows = &self.windows;

        let steps_per_da_window = grid.steps_in(windows.da_window)?;
        let steps_per_prediction_window = grid.steps_in(windows.prediction_window)?;
        if steps_per_da_window <= 0 || steps_per_prediction_window <= 0 {
            return Err(invalid("windows must span at least one contact interval"));
        }
        let start_step = Step::new(grid.steps_in(self.time.start_time)?);
        let steps_per_save = grid.steps_in(self.time.save_to_file_interval)?;
        if steps_per_save <= 0 {
            return Err(invalid("time.save_to_file_interval must be positive"));
        }

        let n_windows = self.time.total_time / windows.prediction_window;
        let rounded = n_windows.round();
        if (n_windows - rounded).abs() > 1e-9 * rounded.max(1.0) {
            return Err(invalid(
                "time.total_time must be a whole number of prediction windows",
            ));
        }
        let n_prediction_windows = whole(rounded)
            .ok_or_else(|| invalid("time.total_time must be positive"))?;
        if n_prediction_windows <= windows.n_spin_up_windows {
            return Err(invalid("the run must be longer than its spin-up"));
        }
        let spin_up_span = windows.prediction_window * (windows.n_spin_up_windows as f64 + 1.0);
        if spin_up_span <= windows.da_window {
            return Err(invalid(
                "spin-up plus one prediction window must exceed the DA window",
            ));
        }
        if windows.n_sweeps == 0 {
            return Err(invalid("windows.n_sweeps must be at least 1"));
        }
        if windows.n_forward_steps == 0 || windows.n_backward_steps == 0 {
            return Err(invalid("solver sub-step counts must be at least 1"));
        }

        if self.ensemble.ensemble_size < 2 {
            return Err(invalid("ensemble.ensemble_size must be at least 2"));
        }
        if !(0.0..=1.0).contains(&self.ensemble.initial_infected_fraction) {
            return Err(invalid("ensemble.initial_infected_fraction must lie in [0, 1]"));
        }

        self.parameters.validate()?;
        self.population.validate()?;

        let mut names = std::collections::BTreeSet::new();
        for source in &self.sources {
            source.validate().map_err(|e| invalid(e.to_string()))?;
            if !names.insert(source.name.as_str()) {
                return Err(invalid(format!("duplicate source name '{}'", source.name)));
            }
            grid.steps_in(source.interval)?;
            grid.steps_in(source.delay)?;
        }

        let steps_per_contact_trace = if self.intervention.selection == NodeSelection::ContactTracing {
            grid.steps_in(self.intervention.contact_trace_days)?
        } else {
            0
        };
        self.intervention.validate(&grid)?;

        Ok(WindowPlan {
            grid,
            start_step,
            steps_per_da_window,
            steps_per_prediction_window,
            steps_per_contact_trace,
            steps_per_save,
            n_prediction_windows,
            n_spin_up_windows: windows.n_spin_up_windows,
            earliest_assimilation_time: spin_up_span - windows.da_window,
        })
    }
}

/// Convert a rounded, non-negative float into a count.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole(rounded: f64) -> Option<usize> {
    // Range-checked: positive and below 2^32.
    (1.0..4_294_967_296.0).contains(&rounded).then_some(rounded as usize)
}

// ---------------------------------------------------------------------------
// Derived step counts
// ---------------------------------------------------------------------------

/// Step counts of a validated run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPlan {
    /// The time grid.
    pub grid: TimeGrid,
    /// Step of `time.start_time`.
    pub start_step: Step,
    /// Contact intervals per DA window.
    pub steps_per_da_window: i64,
    /// Contact intervals per prediction window.
    pub steps_per_prediction_window: i64,
    /// Contact intervals of contact-trace lookback (zero without tracing).
    pub steps_per_contact_trace: i64,
    /// Contact intervals between periodic dumps.
    pub steps_per_save: i64,
    /// Prediction windows in the run, spin-up included.
    pub n_prediction_windows: usize,
    /// Prediction windows run without assimilation.
    pub n_spin_up_windows: usize,
    /// Observations are only collected after this time.
    pub earliest_assimilation_time: f64,
}

impl WindowPlan {
    /// Contact intervals in the whole run.
    pub fn total_steps(&self) -> usize {
        let per_window = usize::try_from(self.steps_per_prediction_window).unwrap_or(0);
        per_window.saturating_mul(self.n_prediction_windows)
    }

    /// Contact intervals of spin-up.
    pub fn spin_up_steps(&self) -> usize {
        let per_window = usize::try_from(self.steps_per_prediction_window).unwrap_or(0);
        per_window.saturating_mul(self.n_spin_up_windows)
    }

    /// Network intervals the store must retain.
    pub fn store_capacity(&self) -> usize {
        let da = usize::try_from(self.steps_per_da_window).unwrap_or(0);
        let prediction = usize::try_from(self.steps_per_prediction_window).unwrap_or(0);
        let trace = usize::try_from(self.steps_per_contact_trace).unwrap_or(0);
        da.saturating_add(prediction).max(trace)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Run identity and output location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Human-readable run name.
    #[serde(default = "default_run_name")]
    pub name: String,

    /// Seed for every random stream of the run.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Directory the output sink writes to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Run the forecast without collecting or assimilating observations.
    #[serde(default)]
    pub prior_run: bool,
}

impl RunConfig {
    /// Override the output directory with `CONTAGION_OUTPUT_DIR` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(OUTPUT_DIR_ENV) {
            self.output_dir = PathBuf::from(val);
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_run_name(),
            seed: default_seed(),
            output_dir: default_output_dir(),
            prior_run: false,
        }
    }
}

/// Time grid and run length, in days.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeConfig {
    /// Length of one static contact interval; the grid spacing.
    #[serde(default = "default_static_contact_interval")]
    pub static_contact_interval: f64,

    /// Start of the run. Must lie on the grid.
    #[serde(default)]
    pub start_time: f64,

    /// Length of the run, spin-up included.
    #[serde(default = "default_total_time")]
    pub total_time: f64,

    /// Interval between periodic dumps.
    #[serde(default = "default_one_day")]
    pub save_to_file_interval: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            static_contact_interval: default_static_contact_interval(),
            start_time: 0.0,
            total_time: default_total_time(),
            save_to_file_interval: default_one_day(),
        }
    }
}

/// Window lengths and sweep schedule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WindowConfig {
    /// Sweep scheme.
    #[serde(default)]
    pub variant: SweepVariant,

    /// Length of the assimilation lookback.
    #[serde(default = "default_one_day")]
    pub da_window: f64,

    /// Length of one prediction window.
    #[serde(default = "default_one_day")]
    pub prediction_window: f64,

    /// Sweeps per window.
    #[serde(default = "default_one")]
    pub n_sweeps: usize,

    /// Record passes per iterated-forward sweep.
    #[serde(default = "default_one")]
    pub n_record_sweeps: usize,

    /// Prediction windows run without assimilation.
    #[serde(default = "default_spin_up_windows")]
    pub n_spin_up_windows: usize,

    /// Minimum solver sub-steps per forward interval.
    #[serde(default = "default_one")]
    pub n_forward_steps: usize,

    /// Minimum solver sub-steps per backward interval.
    #[serde(default = "default_backward_steps")]
    pub n_backward_steps: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            variant: SweepVariant::default(),
            da_window: default_one_day(),
            prediction_window: default_one_day(),
            n_sweeps: default_one(),
            n_record_sweeps: default_one(),
            n_spin_up_windows: default_spin_up_windows(),
            n_forward_steps: default_one(),
            n_backward_steps: default_backward_steps(),
        }
    }
}

/// Ensemble size and initial state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnsembleConfig {
    /// Number of members.
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,

    /// Mean initial infectious fraction per node.
    #[serde(default = "default_initial_infected_fraction")]
    pub initial_infected_fraction: f64,

    /// Relative spread of the initial infectious fraction across members.
    #[serde(default = "default_initial_spread")]
    pub initial_spread: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            ensemble_size: default_ensemble_size(),
            initial_infected_fraction: default_initial_infected_fraction(),
            initial_spread: default_initial_spread(),
        }
    }
}

/// The six clinical quantities under their configuration names.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ClinicalValues {
    /// Days from exposure to infectiousness.
    #[serde(default = "default_latent_period")]
    pub latent_period: f64,
    /// Days infectious in the community.
    #[serde(default = "default_community_infection_period")]
    pub community_infection_period: f64,
    /// Days in hospital.
    #[serde(default = "default_hospital_infection_period")]
    pub hospital_infection_period: f64,
    /// Probability of hospitalization.
    #[serde(default = "default_hospitalization_fraction")]
    pub hospitalization_fraction: f64,
    /// Probability of death in the community.
    #[serde(default = "default_community_mortality_fraction")]
    pub community_mortality_fraction: f64,
    /// Probability of death in hospital.
    #[serde(default = "default_hospital_mortality_fraction")]
    pub hospital_mortality_fraction: f64,
}

impl ClinicalValues {
    /// Values in [`ClinicalRate`] storage order.
    pub const fn to_array(&self) -> [f64; ClinicalRate::COUNT] {
        [
            self.latent_period,
            self.community_infection_period,
            self.hospital_infection_period,
            self.hospitalization_fraction,
            self.community_mortality_fraction,
            self.hospital_mortality_fraction,
        ]
    }
}

impl Default for ClinicalValues {
    fn default() -> Self {
        Self {
            latent_period: default_latent_period(),
            community_infection_period: default_community_infection_period(),
            hospital_infection_period: default_hospital_infection_period(),
            hospitalization_fraction: default_hospitalization_fraction(),
            community_mortality_fraction: default_community_mortality_fraction(),
            hospital_mortality_fraction: default_hospital_mortality_fraction(),
        }
    }
}

/// Learned parameters, their priors and bounds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParametersConfig {
    /// Whether sources may learn transition rates.
    #[serde(default)]
    pub learn_transition_rates: bool,

    /// Which transition-rate kinds are learned.
    #[serde(default)]
    pub learned_rates: Vec<ClinicalRate>,

    /// Whether sources may learn the transmission rate.
    #[serde(default)]
    pub learn_transmission_rate: bool,

    /// One transmission rate per node instead of one per population.
    #[serde(default)]
    pub per_node_transmission: bool,

    /// Transform applied inside the joint vector.
    #[serde(default)]
    pub transform: ParameterTransform,

    /// Prior mean of the clinical quantities.
    #[serde(default)]
    pub prior_clinical: ClinicalValues,

    /// Prior mean of the transmission rate.
    #[serde(default = "default_transmission_rate")]
    pub prior_transmission_rate: f64,

    /// Log-normal spread of the prior parameter ensemble.
    #[serde(default = "default_prior_spread")]
    pub prior_spread: f64,

    /// Bounds per learned transition-rate kind; missing kinds are unbounded
    /// above and floored at zero.
    #[serde(default)]
    pub transition_bounds: BTreeMap<ClinicalRate, ParameterBounds>,

    /// Bounds of the transmission rate.
    #[serde(default = "default_transmission_bounds")]
    pub transmission_bounds: ParameterBounds,
}

impl ParametersConfig {
    /// The filter-side view of these settings.
    pub fn settings(&self) -> ParameterSettings {
        let mut settings = ParameterSettings {
            learned_kinds: if self.learn_transition_rates {
                self.learned_rates.clone()
            } else {
                Vec::new()
            },
            learn_transmission_rate: self.learn_transmission_rate,
            transform: self.transform,
            transmission_bounds: self.transmission_bounds,
            ..ParameterSettings::default()
        };
        for (kind, bounds) in &self.transition_bounds {
            settings.transition_bounds[kind.index()] = *bounds;
        }
        settings
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.transmission_bounds.is_valid() {
            return Err(invalid("parameters.transmission_bounds must satisfy min <= max"));
        }
        if let Some((kind, _)) = self.transition_bounds.iter().find(|(_, b)| !b.is_valid()) {
            return Err(invalid(format!(
                "parameters.transition_bounds for {kind:?} must satisfy min <= max"
            )));
        }
        if self.learn_transition_rates && self.learned_rates.is_empty() {
            return Err(invalid(
                "parameters.learned_rates must name a rate when learning transition rates",
            ));
        }
        if !(self.prior_spread.is_finite() && self.prior_spread >= 0.0) {
            return Err(invalid("parameters.prior_spread must be non-negative"));
        }
        if self.prior_transmission_rate <= 0.0 {
            return Err(invalid("parameters.prior_transmission_rate must be positive"));
        }
        Ok(())
    }
}

impl Default for ParametersConfig {
    fn default() -> Self {
        Self {
            learn_transition_rates: false,
            learned_rates: Vec::new(),
            learn_transmission_rate: false,
            per_node_transmission: false,
            transform: ParameterTransform::default(),
            prior_clinical: ClinicalValues::default(),
            prior_transmission_rate: default_transmission_rate(),
            prior_spread: default_prior_spread(),
            transition_bounds: BTreeMap::new(),
            transmission_bounds: default_transmission_bounds(),
        }
    }
}

/// Intervention schedule and policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InterventionConfig {
    /// When the policy runs.
    #[serde(default)]
    pub frequency: InterventionFrequency,

    /// First time the policy runs.
    #[serde(default)]
    pub start_time: f64,

    /// Days between runs for the interval schedule.
    #[serde(default = "default_one_day")]
    pub interval: f64,

    /// Which nodes are selected.
    #[serde(default)]
    pub selection: NodeSelection,

    /// What is done to them.
    #[serde(rename = "type", default)]
    pub kind: InterventionType,

    /// Contact rate of isolated nodes.
    #[serde(default = "default_isolate_lambda")]
    pub isolate_lambda: f64,

    /// Midday contact-rate cap under social distancing.
    #[serde(default = "default_distanced_max_contact_rate")]
    pub distanced_max_contact_rate: f64,

    /// Days a selection stays in force.
    #[serde(default = "default_isolation_period")]
    pub isolation_period: f64,

    /// Nodes drawn by the random selection.
    #[serde(default = "default_random_budget")]
    pub random_budget: usize,

    /// Probability above which a node counts as sick.
    #[serde(default = "default_sick_threshold")]
    pub sick_threshold: f64,

    /// Count exposed plus infectious as sick.
    #[serde(default)]
    pub sum_ei: bool,

    /// Days of contact history searched by contact tracing.
    #[serde(default = "default_contact_trace_days")]
    pub contact_trace_days: f64,
}

impl InterventionConfig {
    fn validate(&self, grid: &TimeGrid) -> Result<(), ConfigError> {
        if self.frequency == InterventionFrequency::Never {
            return Ok(());
        }
        grid.steps_in(self.start_time)?;
        if self.frequency == InterventionFrequency::Interval && grid.steps_in(self.interval)? <= 0 {
            return Err(invalid("intervention.interval must be positive"));
        }
        if grid.steps_in(self.isolation_period)? <= 0 {
            return Err(invalid("intervention.isolation_period must be positive"));
        }
        if !(0.0..=1.0).contains(&self.sick_threshold) {
            return Err(invalid("intervention.sick_threshold must lie in [0, 1]"));
        }
        if self.isolate_lambda < 0.0 || self.distanced_max_contact_rate < 0.0 {
            return Err(invalid("intervention contact rates must be non-negative"));
        }
        if self.selection == NodeSelection::ContactTracing && grid.steps_in(self.contact_trace_days)? <= 0 {
            return Err(invalid("intervention.contact_trace_days must be positive"));
        }
        Ok(())
    }
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            frequency: InterventionFrequency::default(),
            start_time: 0.0,
            interval: default_one_day(),
            selection: NodeSelection::default(),
            kind: InterventionType::default(),
            isolate_lambda: default_isolate_lambda(),
            distanced_max_contact_rate: default_distanced_max_contact_rate(),
            isolation_period: default_isolation_period(),
            random_budget: default_random_budget(),
            sick_threshold: default_sick_threshold(),
            sum_ei: false,
            contact_trace_days: default_contact_trace_days(),
        }
    }
}

/// Reference population used by the bundled collaborators.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PopulationConfig {
    /// Number of nodes in the full population.
    #[serde(default = "default_population")]
    pub n_nodes: usize,

    /// Fraction of nodes that are users (observed and forecast).
    #[serde(default = "default_user_fraction")]
    pub user_fraction: f64,

    /// Mean degree of the contact graph.
    #[serde(default = "default_mean_degree")]
    pub mean_degree: f64,

    /// Night-time contact rate.
    #[serde(default = "default_lambda_min")]
    pub lambda_min: f64,

    /// Midday contact rate.
    #[serde(default = "default_lambda_max")]
    pub lambda_max: f64,

    /// True clinical quantities of the kinetic model.
    #[serde(default)]
    pub clinical: ClinicalValues,

    /// True transmission rate of the kinetic model.
    #[serde(default = "default_transmission_rate")]
    pub transmission_rate: f64,

    /// Nodes infectious at the start of the run.
    #[serde(default = "default_initial_infected")]
    pub initial_infected: usize,
}

impl PopulationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.n_nodes == 0 {
            return Err(invalid("population.n_nodes must be positive"));
        }
        if !(self.user_fraction > 0.0 && self.user_fraction <= 1.0) {
            return Err(invalid("population.user_fraction must lie in (0, 1]"));
        }
        if self.lambda_min < 0.0 || self.lambda_min > self.lambda_max {
            return Err(invalid("population contact rates must satisfy 0 <= lambda_min <= lambda_max"));
        }
        if self.initial_infected > self.n_nodes {
            return Err(invalid("population.initial_infected exceeds the population"));
        }
        Ok(())
    }
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            n_nodes: default_population(),
            user_fraction: default_user_fraction(),
            mean_degree: default_mean_degree(),
            lambda_min: default_lambda_min(),
            lambda_max: default_lambda_max(),
            clinical: ClinicalValues::default(),
            transmission_rate: default_transmission_rate(),
            initial_infected: default_initial_infected(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_run_name() -> String {
    "contagion".to_owned()
}
const fn default_seed() -> u64 {
    42
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
const fn default_static_contact_interval() -> f64 {
    0.125
}
const fn default_total_time() -> f64 {
    14.0
}
const fn default_one_day() -> f64 {
    1.0
}
const fn default_one() -> usize {
    1
}
const fn default_spin_up_windows() -> usize {
    2
}
const fn default_backward_steps() -> usize {
    8
}
const fn default_ensemble_size() -> usize {
    50
}
const fn default_initial_infected_fraction() -> f64 {
    0.01
}
const fn default_initial_spread() -> f64 {
    0.5
}
const fn default_latent_period() -> f64 {
    3.7
}
const fn default_community_infection_period() -> f64 {
    3.2
}
const fn default_hospital_infection_period() -> f64 {
    5.0
}
const fn default_hospitalization_fraction() -> f64 {
    0.1
}
const fn default_community_mortality_fraction() -> f64 {
    0.001
}
const fn default_hospital_mortality_fraction() -> f64 {
    0.1
}
const fn default_transmission_rate() -> f64 {
    12.0
}
const fn default_prior_spread() -> f64 {
    0.1
}
const fn default_transmission_bounds() -> ParameterBounds {
    ParameterBounds::new(0.01, 100.0)
}
const fn default_isolate_lambda() -> f64 {
    0.0
}
const fn default_distanced_max_contact_rate() -> f64 {
    10.0
}
const fn default_isolation_period() -> f64 {
    14.0
}
const fn default_random_budget() -> usize {
    10
}
const fn default_sick_threshold() -> f64 {
    0.1
}
const fn default_contact_trace_days() -> f64 {
    7.0
}
const fn default_population() -> usize {
    500
}
const fn default_user_fraction() -> f64 {
    1.0
}
const fn default_mean_degree() -> f64 {
    8.0
}
const fn default_lambda_min() -> f64 {
    5.0
}
const fn default_lambda_max() -> f64 {
    22.0
}
const fn default_initial_infected() -> usize {
    10
}
fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AssimilationConfig::default();
        let plan = config.validate().unwrap();
        assert_eq!(plan.steps_per_da_window, 8);
        assert_eq!(plan.steps_per_prediction_window, 8);
        assert_eq!(plan.n_prediction_windows, 14);
        assert_eq!(plan.total_steps(), 112);
        assert_eq!(plan.store_capacity(), 16);
        assert_relative_eq!(plan.earliest_assimilation_time, 2.0);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
run:
  name: sandbox
  seed: 7
time:
  static_contact_interval: 0.125
  total_time: 10.0
windows:
  variant: backward_forward
  da_window: 2.0
  n_spin_up_windows: 2
ensemble:
  ensemble_size: 20
parameters:
  learn_transmission_rate: true
  transform: log
  transmission_bounds: { min: 1.0, max: 30.0 }
  transition_bounds:
    latent_period: { min: 2.0, max: 6.0 }
sources:
  - name: survey
    kind: sensor
    sampling: { policy: random, budget: 20 }
  - name: tests
    kind: viral_test
    delay: 1.0
    learn_transmission_rate: true
intervention:
  frequency: interval
  selection: sick
  type: isolate
";
        let config = AssimilationConfig::parse(yaml).unwrap();
        assert_eq!(config.run.seed, 7);
        assert_eq!(config.windows.variant, SweepVariant::BackwardForward);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.intervention.kind, InterventionType::Isolate);
        let settings = config.parameters.settings();
        assert_relative_eq!(
            settings.transition_bounds[ClinicalRate::LatentPeriod.index()].max,
            6.0
        );
        let plan = config.validate().unwrap();
        assert_eq!(plan.steps_per_da_window, 16);
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = AssimilationConfig::parse(include_str!("../../../contagion-config.yaml")).unwrap();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.parameters.transform, ParameterTransform::Log);
        let plan = config.validate().unwrap();
        assert_eq!(plan.n_prediction_windows, 14);
        assert_eq!(plan.steps_per_prediction_window, 8);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let yaml = "windows:\n  variant: sideways\n";
        assert!(matches!(
            AssimilationConfig::parse(yaml),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn da_window_must_fit_the_grid() {
        let mut config = AssimilationConfig::default();
        config.windows.da_window = 1.3;
        assert!(matches!(config.validate(), Err(ConfigError::Time { .. })));
    }

    #[test]
    fn spin_up_must_cover_the_da_window() {
        let mut config = AssimilationConfig::default();
        config.windows.da_window = 3.0;
        config.windows.n_spin_up_windows = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn tiny_ensemble_is_rejected() {
        let mut config = AssimilationConfig::default();
        config.ensemble.ensemble_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut config = AssimilationConfig::default();
        config.parameters.transmission_bounds = ParameterBounds::new(5.0, 1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_source_names_are_rejected() {
        let mut config = AssimilationConfig::default();
        let source = SourceConfig::new("tests", contagion_filter::ObservationKind::ViralTest);
        config.sources = vec![source.clone(), source];
        assert!(config.validate().is_err());
    }
}

//! Per-source configuration.
//!
//! One entry of the `sources` list in `contagion-config.yaml`. Every knob
//! has a default so a minimal entry only names the source, its kind and
//! its sampling policy.

use serde::Deserialize;

use contagion_types::Compartment;

use crate::FilterError;
use crate::eakf::{EakfSettings, UpdateMethod};
use crate::localization::UpdateType;
use crate::observation::{ObservationKind, RecordPolarity, SamplingPolicy};

/// Configuration of one observation source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    /// Unique name used in logs and output.
    pub name: String,

    /// Channel the source draws from.
    pub kind: ObservationKind,

    /// Cadence in days between observations.
    #[serde(default = "default_interval")]
    pub interval: f64,

    /// Days until a result may be assimilated.
    #[serde(default)]
    pub delay: f64,

    /// Compartment the source observes.
    #[serde(default = "default_compartment")]
    pub compartment: Compartment,

    /// Node selection per cadence step.
    #[serde(default = "default_sampling")]
    pub sampling: SamplingPolicy,

    /// Test sensitivity (sensors and viral tests).
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    /// Test specificity (sensors and viral tests).
    #[serde(default = "default_specificity")]
    pub specificity: f64,

    /// Which record nodes are reported (records only).
    #[serde(default)]
    pub record_polarity: RecordPolarity,

    /// Reported probability for a recorded node (records only).
    #[serde(default = "default_record_certainty")]
    pub record_certainty: f64,

    /// Floor of the observation-noise variance.
    #[serde(default = "default_min_noise_variance")]
    pub min_noise_variance: f64,

    /// Sequential sub-batches per update.
    #[serde(default = "default_batches")]
    pub n_assimilation_batches: usize,

    /// Global or localized update.
    #[serde(default)]
    pub update_type: UpdateType,

    /// Deterministic or perturbed-observation member update.
    #[serde(default)]
    pub update_method: UpdateMethod,

    /// Pseudo-inverse instead of Cholesky for the innovation covariance.
    #[serde(default = "default_true")]
    pub full_svd: bool,

    /// Added to every observation-noise variance.
    #[serde(default)]
    pub obs_cov_noise: f64,

    /// Added to the innovation covariance diagonal.
    #[serde(default)]
    pub joint_cov_noise: f64,

    /// Relative inflation of each observed prior variance.
    #[serde(default)]
    pub elementwise_reg: f64,

    /// Multiplicative inflation factor for the state anomalies.
    #[serde(default = "default_inflation")]
    pub inflation: f64,

    /// Whether multiplicative inflation is applied to the state.
    #[serde(default)]
    pub inflate_states: bool,

    /// Restrict state inflation to the infectious compartment.
    #[serde(default)]
    pub inflate_infected_only: bool,

    /// Multiplicative inflation factor for the transmission rate.
    #[serde(default = "default_inflation")]
    pub transmission_inflation: f64,

    /// Relative standard deviation of additive state inflation (zero disables).
    #[serde(default)]
    pub additive_inflation_factor: f64,

    /// Renormalize node compartments after an update.
    #[serde(default = "default_true")]
    pub mass_conservation: bool,

    /// Whether this source updates the learned transition rates.
    #[serde(default)]
    pub learn_transition_rates: bool,

    /// Whether this source updates the transmission rate.
    #[serde(default)]
    pub learn_transmission_rate: bool,
}

const fn default_interval() -> f64 {
    1.0
}
const fn default_compartment() -> Compartment {
    Compartment::I
}
const fn default_sampling() -> SamplingPolicy {
    SamplingPolicy::AllNodes
}
const fn default_sensitivity() -> f64 {
    0.95
}
const fn default_specificity() -> f64 {
    0.99
}
const fn default_record_certainty() -> f64 {
    0.99
}
const fn default_min_noise_variance() -> f64 {
    1e-4
}
const fn default_batches() -> usize {
    1
}
const fn default_true() -> bool {
    true
}
const fn default_inflation() -> f64 {
    1.0
}

impl SourceConfig {
    /// A source of `kind` with every knob at its default.
    pub fn new(name: &str, kind: ObservationKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            interval: default_interval(),
            delay: 0.0,
            compartment: default_compartment(),
            sampling: default_sampling(),
            sensitivity: default_sensitivity(),
            specificity: default_specificity(),
            record_polarity: RecordPolarity::default(),
            record_certainty: default_record_certainty(),
            min_noise_variance: default_min_noise_variance(),
            n_assimilation_batches: default_batches(),
            update_type: UpdateType::default(),
            update_method: UpdateMethod::default(),
            full_svd: true,
            obs_cov_noise: 0.0,
            joint_cov_noise: 0.0,
            elementwise_reg: 0.0,
            inflation: default_inflation(),
            inflate_states: false,
            inflate_infected_only: false,
            transmission_inflation: default_inflation(),
            additive_inflation_factor: 0.0,
            mass_conservation: true,
            learn_transition_rates: false,
            learn_transmission_rate: false,
        }
    }

    /// Numerical settings of the filter core.
    pub const fn eakf_settings(&self) -> EakfSettings {
        EakfSettings {
            full_svd: self.full_svd,
            obs_cov_noise: self.obs_cov_noise,
            joint_cov_noise: self.joint_cov_noise,
            elementwise_reg: self.elementwise_reg,
            method: self.update_method,
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidSource`] naming the first bad field.
    pub fn validate(&self) -> Result<(), FilterError> {
        let invalid = |reason: &str| FilterError::InvalidSource {
            name: self.name.clone(),
            reason: reason.to_owned(),
        };
        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(invalid("interval must be positive"));
        }
        if !(self.delay.is_finite() && self.delay >= 0.0) {
            return Err(invalid("delay must be non-negative"));
        }
        for (field, value) in [
            ("sensitivity", self.sensitivity),
            ("specificity", self.specificity),
            ("record_certainty", self.record_certainty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(&format!("{field} must lie in [0, 1]")));
            }
        }
        if self.n_assimilation_batches == 0 {
            return Err(invalid("n_assimilation_batches must be at least 1"));
        }
        if self.min_noise_variance <= 0.0 {
            return Err(invalid("min_noise_variance must be positive"));
        }
        for (field, value) in [
            ("obs_cov_noise", self.obs_cov_noise),
            ("joint_cov_noise", self.joint_cov_noise),
            ("elementwise_reg", self.elementwise_reg),
            ("additive_inflation_factor", self.additive_inflation_factor),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(&format!("{field} must be non-negative")));
            }
        }
        if self.inflation <= 0.0 || self.transmission_inflation <= 0.0 {
            return Err(invalid("inflation factors must be positive"));
        }
        if matches!(self.kind, ObservationKind::Record)
            && !matches!(self.compartment, Compartment::H | Compartment::D)
        {
            return Err(invalid("records observe the H or D compartment"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let yaml = "name: sensors\nkind: sensor\nsampling:\n  policy: random\n  budget: 25\n";
        let config: SourceConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.sampling, SamplingPolicy::Random { budget: 25 });
        assert_eq!(config.compartment, Compartment::I);
        assert_eq!(config.update_type, UpdateType::Global);
        assert!(config.mass_conservation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_update_type_is_rejected_at_load() {
        let yaml = "name: tests\nkind: viral_test\nupdate_type: regional\n";
        assert!(serde_yml::from_str::<SourceConfig>(yaml).is_err());
    }

    #[test]
    fn records_must_observe_hospital_or_death() {
        let mut config = SourceConfig::new("records", ObservationKind::Record);
        assert!(config.validate().is_err());
        config.compartment = Compartment::H;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = SourceConfig::new("tests", ObservationKind::ViralTest);
        config.sensitivity = 1.5;
        assert!(config.validate().is_err());
        let mut config = SourceConfig::new("tests", ObservationKind::ViralTest);
        config.n_assimilation_batches = 0;
        assert!(config.validate().is_err());
    }
}

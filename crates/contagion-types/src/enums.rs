//! Enumeration types for the Contagion engine.
//!
//! Every configuration switch that the engine branches on is a closed
//! enumeration. Serde deserializes them from `snake_case` tags, so an unknown
//! tag in the configuration file is rejected at load time rather than at the
//! first call that would have used it.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Compartments
// ---------------------------------------------------------------------------

/// Epidemiological compartment of a single node.
///
/// The declaration order is the column order of the ensemble state matrix:
/// compartment `c` of node `n` lives at column `c * n_nodes + n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Compartment {
    /// Susceptible.
    S,
    /// Exposed (infected, not yet infectious).
    E,
    /// Infectious in the community.
    I,
    /// Hospitalized.
    H,
    /// Resistant (recovered).
    R,
    /// Deceased.
    D,
}

impl Compartment {
    /// Number of compartments.
    pub const COUNT: usize = 6;

    /// All compartments in column order.
    pub const ALL: [Self; Self::COUNT] = [Self::S, Self::E, Self::I, Self::H, Self::R, Self::D];

    /// Position of this compartment in the column layout.
    pub const fn index(self) -> usize {
        match self {
            Self::S => 0,
            Self::E => 1,
            Self::I => 2,
            Self::H => 3,
            Self::R => 4,
            Self::D => 5,
        }
    }

    /// Single-letter label used in logs and output files.
    pub const fn label(self) -> &'static str {
        match self {
            Self::S => "S",
            Self::E => "E",
            Self::I => "I",
            Self::H => "H",
            Self::R => "R",
            Self::D => "D",
        }
    }
}

impl core::fmt::Display for Compartment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Clinical rates
// ---------------------------------------------------------------------------

/// One of the six clinical quantities that determine a node's transition rates.
///
/// Periods are in days; fractions are probabilities. The master equations
/// convert them into rates (`1 / period`, `fraction / period`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalRate {
    /// Mean time from exposure to infectiousness.
    LatentPeriod,
    /// Mean time spent infectious in the community.
    CommunityInfectionPeriod,
    /// Mean time spent in hospital.
    HospitalInfectionPeriod,
    /// Probability that an infectious node is hospitalized.
    HospitalizationFraction,
    /// Probability that an infectious node dies in the community.
    CommunityMortalityFraction,
    /// Probability that a hospitalized node dies.
    HospitalMortalityFraction,
}

impl ClinicalRate {
    /// Number of clinical rate kinds.
    pub const COUNT: usize = 6;

    /// All rate kinds in storage order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::LatentPeriod,
        Self::CommunityInfectionPeriod,
        Self::HospitalInfectionPeriod,
        Self::HospitalizationFraction,
        Self::CommunityMortalityFraction,
        Self::HospitalMortalityFraction,
    ];

    /// Position of this rate kind in the storage layout.
    pub const fn index(self) -> usize {
        match self {
            Self::LatentPeriod => 0,
            Self::CommunityInfectionPeriod => 1,
            Self::HospitalInfectionPeriod => 2,
            Self::HospitalizationFraction => 3,
            Self::CommunityMortalityFraction => 4,
            Self::HospitalMortalityFraction => 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter transform
// ---------------------------------------------------------------------------

/// Transform applied to parameters inside the joint assimilation vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterTransform {
    /// Parameters are assimilated as-is.
    #[default]
    Identity,
    /// Parameters are assimilated as natural logarithms, which keeps the
    /// recovered physical values strictly positive.
    Log,
}

impl ParameterTransform {
    /// Map a physical value into assimilation space.
    ///
    /// Non-positive inputs to the log transform are floored at the smallest
    /// positive normal `f64` so the result stays finite.
    pub fn forward(self, value: f64) -> f64 {
        match self {
            Self::Identity => value,
            Self::Log => value.max(f64::MIN_POSITIVE).ln(),
        }
    }

    /// Map a value from assimilation space back to physical space.
    pub fn inverse(self, value: f64) -> f64 {
        match self {
            Self::Identity => value,
            Self::Log => value.exp(),
        }
    }
}

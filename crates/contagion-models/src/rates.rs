//! Transition rates derived from clinical quantities.
//!
//! Both epidemic models share one SEIHRD flow:
//!
//! ```text
//! S -> E            infection hazard
//! E -> I            sigma = 1 / latent period
//! I -> H, R, D      gamma = 1 / community infection period, split by h, d
//! H -> R, D         gamma' = 1 / hospital infection period, split by d'
//! ```

use contagion_types::ClinicalRate;

/// Rates of one node, per day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRates {
    /// Exposed to infectious.
    pub sigma: f64,
    /// Rate of leaving the infectious compartment.
    pub gamma: f64,
    /// Rate of leaving hospital.
    pub gamma_hospital: f64,
    /// Share of infectious nodes that are hospitalized.
    pub hospitalization: f64,
    /// Share of infectious nodes that die in the community.
    pub community_mortality: f64,
    /// Share of hospitalized nodes that die.
    pub hospital_mortality: f64,
}

impl TransitionRates {
    /// Convert clinical quantities, indexed by [`ClinicalRate::index`].
    ///
    /// Periods are floored at a tiny positive value and fractions clipped
    /// to the unit interval, so assimilated parameters at their bounds still
    /// produce finite rates.
    pub fn from_clinical(clinical: &[f64; ClinicalRate::COUNT]) -> Self {
        let period = |kind: ClinicalRate| clinical[kind.index()].max(f64::EPSILON);
        let fraction = |kind: ClinicalRate| clinical[kind.index()].clamp(0.0, 1.0);
        let hospitalization = fraction(ClinicalRate::HospitalizationFraction);
        Self {
            sigma: period(ClinicalRate::LatentPeriod).recip(),
            gamma: period(ClinicalRate::CommunityInfectionPeriod).recip(),
            gamma_hospital: period(ClinicalRate::HospitalInfectionPeriod).recip(),
            hospitalization,
            community_mortality: fraction(ClinicalRate::CommunityMortalityFraction).min(1.0 - hospitalization),
            hospital_mortality: fraction(ClinicalRate::HospitalMortalityFraction),
        }
    }

    /// Infectious to hospitalized.
    pub const fn infected_to_hospitalized(&self) -> f64 {
        self.hospitalization * self.gamma
    }

    /// Infectious to resistant.
    pub const fn infected_to_resistant(&self) -> f64 {
        (1.0 - self.hospitalization - self.community_mortality) * self.gamma
    }

    /// Infectious to deceased.
    pub const fn infected_to_deceased(&self) -> f64 {
        self.community_mortality * self.gamma
    }

    /// Hospitalized to resistant.
    pub const fn hospitalized_to_resistant(&self) -> f64 {
        (1.0 - self.hospital_mortality) * self.gamma_hospital
    }

    /// Hospitalized to deceased.
    pub const fn hospitalized_to_deceased(&self) -> f64 {
        self.hospital_mortality * self.gamma_hospital
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn outflows_sum_to_the_leaving_rate() {
        let rates = TransitionRates::from_clinical(&[3.7, 3.2, 5.0, 0.1, 0.001, 0.1]);
        assert_relative_eq!(rates.sigma, 1.0 / 3.7);
        let infected_out =
            rates.infected_to_hospitalized() + rates.infected_to_resistant() + rates.infected_to_deceased();
        assert_relative_eq!(infected_out, rates.gamma);
        let hospital_out = rates.hospitalized_to_resistant() + rates.hospitalized_to_deceased();
        assert_relative_eq!(hospital_out, 0.2);
    }

    #[test]
    fn degenerate_clinical_values_stay_finite() {
        let rates = TransitionRates::from_clinical(&[0.0, -1.0, 5.0, 1.5, 0.5, 2.0]);
        assert!(rates.sigma.is_finite() && rates.gamma.is_finite());
        assert_relative_eq!(rates.hospitalization, 1.0);
        assert_relative_eq!(rates.community_mortality, 0.0);
        assert!(rates.infected_to_resistant() >= 0.0);
    }
}

//! Per-step reporting series of the forecast ensemble.

use nalgebra::DMatrix;

use contagion_store::{EnsembleTimeSeries, TimeSeriesError};
use contagion_types::{ClinicalRate, Compartment, EnsembleState, ParameterEnsemble, ParameterTransform};

use crate::sink::{Artifact, OutputSink, SinkError};

/// Ensemble trajectories recorded once per step and saved at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingSeries {
    /// Population fraction per compartment: `ensemble_size x 6`.
    pub compartment_fractions: EnsembleTimeSeries,
    /// Member-mean transmission rate: `ensemble_size x 1`.
    pub transmission_rate: EnsembleTimeSeries,
    /// Member-mean log transmission rate, kept under the log transform.
    pub log_transmission_rate: Option<EnsembleTimeSeries>,
    /// Node-averaged clinical values: `ensemble_size x 6`.
    pub transition_rates: EnsembleTimeSeries,
    /// Ensemble-mean transmission rate per column: `1 x width`.
    pub network_transmission_rate: EnsembleTimeSeries,
    /// Ensemble-mean clinical values per node: `6 x n_nodes`.
    pub network_transition_rates: EnsembleTimeSeries,
}

impl ReportingSeries {
    /// Create empty series with room for `capacity` steps.
    pub fn new(
        ensemble_size: usize,
        n_nodes: usize,
        transmission_width: usize,
        transform: ParameterTransform,
        capacity: usize,
    ) -> Self {
        Self {
            compartment_fractions: EnsembleTimeSeries::new(ensemble_size, Compartment::COUNT, capacity),
            transmission_rate: EnsembleTimeSeries::new(ensemble_size, 1, capacity),
            log_transmission_rate: (transform == ParameterTransform::Log)
                .then(|| EnsembleTimeSeries::new(ensemble_size, 1, capacity)),
            transition_rates: EnsembleTimeSeries::new(ensemble_size, ClinicalRate::COUNT, capacity),
            network_transmission_rate: EnsembleTimeSeries::new(1, transmission_width, capacity),
            network_transition_rates: EnsembleTimeSeries::new(ClinicalRate::COUNT, n_nodes, capacity),
        }
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.compartment_fractions.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.compartment_fractions.is_empty()
    }

    /// Append one step.
    ///
    /// # Errors
    ///
    /// Returns [`TimeSeriesError::Overflow`] past the planned step count.
    pub fn record(&mut self, state: &EnsembleState, parameters: &ParameterEnsemble) -> Result<(), TimeSeriesError> {
        let transmission = &parameters.transmission_rate;
        let member_means = DMatrix::from_column_slice(transmission.ensemble_size(), 1, transmission.member_means().as_slice());

        self.compartment_fractions.push_back(state.compartment_fractions())?;
        if let Some(series) = self.log_transmission_rate.as_mut() {
            series.push_back(member_means.map(|v| v.max(f64::MIN_POSITIVE).ln()))?;
        }
        self.transmission_rate.push_back(member_means)?;
        self.transition_rates
            .push_back(parameters.transition_rates.network_means())?;
        let column_means = transmission.column_means();
        self.network_transmission_rate
            .push_back(DMatrix::from_row_slice(1, column_means.len(), column_means.as_slice()))?;

        let rates = &parameters.transition_rates;
        let n = rates.n_nodes();
        let node_means = rates.matrix().row_mean();
        self.network_transition_rates
            .push_back(DMatrix::from_fn(ClinicalRate::COUNT, n, |kind, node| node_means[kind * n + node]))?;
        Ok(())
    }

    /// Hand every series to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the sink fails.
    pub fn save(&self, sink: &mut dyn OutputSink) -> Result<(), SinkError> {
        let mut named = vec![
            ("compartment_fractions", &self.compartment_fractions),
            ("transmission_rate", &self.transmission_rate),
            ("transition_rates", &self.transition_rates),
            ("network_transmission_rate", &self.network_transmission_rate),
            ("network_transition_rates", &self.network_transition_rates),
        ];
        if let Some(series) = &self.log_transmission_rate {
            named.push(("log_transmission_rate", series));
        }
        for (name, series) in named {
            sink.save(&Artifact::Series { name, series })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;

    use contagion_types::{TransitionRateEnsemble, TransmissionRateEnsemble};

    use super::*;
    use crate::sink::MemorySink;

    fn parameters(ensemble_size: usize, n_nodes: usize) -> ParameterEnsemble {
        ParameterEnsemble {
            transition_rates: TransitionRateEnsemble::uniform(
                ensemble_size,
                n_nodes,
                [3.7, 3.2, 5.0, 0.1, 0.001, 0.1],
            ),
            transmission_rate: TransmissionRateEnsemble::population_wide(ensemble_size, 12.0),
        }
    }

    #[test]
    fn records_every_series_each_step() {
        let mut series = ReportingSeries::new(4, 3, 1, ParameterTransform::Log, 2);
        let state = EnsembleState::uniform(4, 3, 0.1);
        series.record(&state, &parameters(4, 3)).unwrap();

        assert_eq!(series.len(), 1);
        let fractions = series.compartment_fractions.get(0).unwrap();
        assert_relative_eq!(fractions[(0, Compartment::I.index())], 0.1);
        let log_rate = series.log_transmission_rate.as_ref().unwrap().get(0).unwrap();
        assert_relative_eq!(log_rate[(3, 0)], 12.0_f64.ln());
        let per_node = series.network_transition_rates.get(0).unwrap();
        assert_eq!(per_node.shape(), (6, 3));
        assert_relative_eq!(per_node[(ClinicalRate::HospitalInfectionPeriod.index(), 2)], 5.0);
    }

    #[test]
    fn overflow_past_the_planned_steps() {
        let mut series = ReportingSeries::new(2, 1, 1, ParameterTransform::Identity, 1);
        let state = EnsembleState::uniform(2, 1, 0.0);
        series.record(&state, &parameters(2, 1)).unwrap();
        assert!(matches!(
            series.record(&state, &parameters(2, 1)),
            Err(TimeSeriesError::Overflow { capacity: 1 })
        ));
    }

    #[test]
    fn saves_log_series_only_under_log_transform() {
        let mut sink = MemorySink::new();
        ReportingSeries::new(2, 1, 1, ParameterTransform::Identity, 1)
            .save(&mut sink)
            .unwrap();
        assert_eq!(sink.stems().count(), 5);
        assert!(sink.get("log_transmission_rate_series").is_none());
        assert!(sink.get("compartment_fractions_series").is_some());
    }
}

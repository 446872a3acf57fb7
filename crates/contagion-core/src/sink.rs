//! Persistence contract for run artifacts.
//!
//! The orchestrator hands every artifact it produces to an [`OutputSink`]:
//! periodic dumps tagged with a step index, and the reporting series at the
//! end of the run. The sink decides where and how they land; the engine
//! binary ships a JSON directory sink, tests use [`MemorySink`].

use std::collections::BTreeMap;

use serde::Serialize;

use contagion_store::EnsembleTimeSeries;
use contagion_types::{CompartmentCounts, NodeId, StatusMap, Step};

/// Errors raised while persisting an artifact.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing the artifact failed.
    #[error("failed to write artifact: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Encoding the artifact failed.
    #[error("failed to encode artifact: {source}")]
    Json {
        /// The underlying encoding error.
        #[from]
        source: serde_json::Error,
    },
}

/// One artifact of a run.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "artifact", rename_all = "snake_case")]
pub enum Artifact<'a> {
    /// Kinetic statuses of the user nodes at a step.
    KineticStatuses {
        /// Step index.
        step: i64,
        /// Statuses by node.
        statuses: &'a StatusMap,
    },
    /// Ensemble-mean forecast state at a step.
    MeanState {
        /// Step index.
        step: i64,
        /// Mean over members, compartment-major.
        mean: &'a [f64],
    },
    /// Kinetic compartment counts of the user nodes, one entry per step.
    StatusTrace {
        /// Counts in step order.
        counts: &'a [CompartmentCounts],
    },
    /// A reporting series.
    Series {
        /// Series name.
        name: &'a str,
        /// The series.
        series: &'a EnsembleTimeSeries,
    },
    /// Nodes selected by the intervention policy, by step.
    InterventionHistory {
        /// Selected nodes by step.
        nodes: &'a BTreeMap<Step, Vec<NodeId>>,
    },
}

impl Artifact<'_> {
    /// Name the artifact is stored under.
    pub fn file_stem(&self) -> String {
        match self {
            Self::KineticStatuses { step, .. } => format!("kinetic_statuses_at_step_{step}"),
            Self::MeanState { step, .. } => format!("mean_state_at_step_{step}"),
            Self::StatusTrace { .. } => "statuses_sum_trace".to_owned(),
            Self::Series { name, .. } => format!("{name}_series"),
            Self::InterventionHistory { .. } => "intervened_nodes".to_owned(),
        }
    }
}

/// Destination of run artifacts.
pub trait OutputSink {
    /// Persist one artifact.
    fn save(&mut self, artifact: &Artifact<'_>) -> Result<(), SinkError>;
}

/// A sink that keeps every artifact in memory as JSON.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Saved artifacts in order, by file stem.
    records: Vec<(String, serde_json::Value)>,
}

impl MemorySink {
    /// Create an empty sink.
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// File stems of the saved artifacts, in save order.
    pub fn stems(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|(stem, _)| stem.as_str())
    }

    /// The last artifact saved under `stem`.
    pub fn get(&self, stem: &str) -> Option<&serde_json::Value> {
        self.records
            .iter()
            .rev()
            .find(|(saved, _)| saved == stem)
            .map(|(_, value)| value)
    }
}

impl OutputSink for MemorySink {
    fn save(&mut self, artifact: &Artifact<'_>) -> Result<(), SinkError> {
        let value = serde_json::to_value(artifact)?;
        self.records.push((artifact.file_stem(), value));
        Ok(())
    }
}

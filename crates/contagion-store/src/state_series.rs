//! Ensemble states recorded by step.
//!
//! During a prediction window the orchestrator records the ensemble state
//! at every step a source might observe. Fixed-lag smoothing later reads
//! the predicted observations back out of those snapshots. A step recorded
//! twice keeps the later state.

use std::collections::BTreeMap;

use contagion_types::{EnsembleState, Step};

/// Ensemble snapshots keyed by grid step.
#[derive(Debug, Clone, Default)]
pub struct StateSeries {
    /// Snapshots keyed by step.
    snapshots: BTreeMap<Step, EnsembleState>,
}

impl StateSeries {
    /// Create an empty series.
    pub const fn new() -> Self {
        Self {
            snapshots: BTreeMap::new(),
        }
    }

    /// Record `state` at `step`, replacing any earlier snapshot there.
    pub fn record(&mut self, step: Step, state: EnsembleState) {
        self.snapshots.insert(step, state);
    }

    /// Snapshot at `step`.
    pub fn get(&self, step: Step) -> Option<&EnsembleState> {
        self.snapshots.get(&step)
    }

    /// Drop every snapshot before `step`.
    pub fn prune_before(&mut self, step: Step) {
        self.snapshots = self.snapshots.split_off(&step);
    }

    /// Recorded steps in ascending order.
    pub fn steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.snapshots.keys().copied()
    }

    /// Number of snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshot is stored.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

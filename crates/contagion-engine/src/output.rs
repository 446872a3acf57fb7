//! JSON run output.
//!
//! Every run writes into its own directory under `run.output_dir`, named by
//! the run id. Artifacts land as `<file stem>.json`; a later artifact with
//! the same stem replaces the earlier file. The run manifest is written last
//! as `manifest.json`.

use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use contagion_core::{Artifact, AssimilationConfig, OutputSink, RunSummary, SinkError, SweepVariant};
use contagion_types::CompartmentCounts;

/// File name of the run manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

// -----------------------------------------------------------------------
// Sink
// -----------------------------------------------------------------------

/// An [`OutputSink`] writing one JSON file per artifact into a directory.
#[derive(Debug, Clone)]
pub struct JsonDirectorySink {
    dir: PathBuf,
}

impl JsonDirectorySink {
    /// Create the directory (and its parents) and a sink writing into it.
    pub fn create(dir: &Path) -> Result<Self, SinkError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Directory the sink writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputSink for JsonDirectorySink {
    fn save(&mut self, artifact: &Artifact<'_>) -> Result<(), SinkError> {
        let path = self.dir.join(format!("{}.json", artifact.file_stem()));
        write_json(&path, artifact)?;
        debug!(path = %path.display(), "Artifact written");
        Ok(())
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SinkError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

// -----------------------------------------------------------------------
// Manifest
// -----------------------------------------------------------------------

/// Identity, settings and outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunManifest {
    /// Time-ordered run id, also the output directory name.
    pub run_id: Uuid,
    /// Configured run name.
    pub name: String,
    /// Configured seed.
    pub seed: u64,
    /// Assimilation variant.
    pub variant: SweepVariant,
    /// Whether assimilation was disabled.
    pub prior_run: bool,
    /// Ensemble members.
    pub ensemble_size: usize,
    /// Nodes in the full population.
    pub n_nodes: usize,
    /// Nodes the forecast covers.
    pub n_users: usize,
    /// Names of the configured observation sources.
    pub sources: Vec<String>,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the run.
    pub finished_at: DateTime<Utc>,
    /// Prediction windows run after spin-up.
    pub windows: usize,
    /// Lockstep forecast steps taken.
    pub steps: usize,
    /// Assimilation calls that changed the ensemble.
    pub updates: usize,
    /// Simulation time at the end of the run.
    pub final_time: f64,
    /// Kinetic compartment counts of the users at the end of the run.
    pub final_counts: CompartmentCounts,
}

impl RunManifest {
    /// Assemble the manifest of a finished run.
    pub fn new(
        run_id: Uuid,
        config: &AssimilationConfig,
        n_users: usize,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        summary: &RunSummary,
    ) -> Self {
        Self {
            run_id,
            name: config.run.name.clone(),
            seed: config.run.seed,
            variant: config.windows.variant,
            prior_run: config.run.prior_run,
            ensemble_size: config.ensemble.ensemble_size,
            n_nodes: config.population.n_nodes,
            n_users,
            sources: config.sources.iter().map(|s| s.name.clone()).collect(),
            started_at,
            finished_at,
            windows: summary.windows,
            steps: summary.steps,
            updates: summary.updates,
            final_time: summary.final_time,
            final_counts: summary.final_counts,
        }
    }

    /// Write the manifest as `manifest.json` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, SinkError> {
        let path = dir.join(MANIFEST_FILE);
        write_json(&path, self)?;
        Ok(path)
    }
}

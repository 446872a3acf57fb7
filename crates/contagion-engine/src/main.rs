//! Engine binary for the Contagion data-assimilation system.
//!
//! Loads the configuration, wires the reference population to the
//! orchestrator, runs the whole forecast-assimilation cycle and writes every
//! artifact as JSON into a per-run output directory.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from the path given as the first argument, or
//!    `contagion-config.yaml` in the working directory
//! 2. Initialize structured logging (tracing)
//! 3. Validate the configuration and derive the window plan
//! 4. Create the run directory `<output_dir>/<run id>`
//! 5. Assemble the reference population
//! 6. Run the orchestrator
//! 7. Write the run manifest

mod error;
mod output;
mod setup;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use contagion_core::config::LoggingConfig;
use contagion_core::{AssimilationConfig, Orchestrator};

use crate::error::EngineError;
use crate::output::{JsonDirectorySink, RunManifest};

/// Configuration file read when no path is given.
const DEFAULT_CONFIG_PATH: &str = "contagion-config.yaml";

/// Application entry point for the engine.
fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (config, found) =
        load_config(&config_path).with_context(|| format!("loading {}", config_path.display()))?;

    init_logging(&config.logging);
    info!("contagion-engine starting");
    if found {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }

    let plan = config.validate().context("validating configuration")?;
    info!(
        run = %config.run.name,
        seed = config.run.seed,
        variant = ?config.windows.variant,
        prior_run = config.run.prior_run,
        windows = plan.n_prediction_windows,
        spin_up_windows = plan.n_spin_up_windows,
        steps = plan.total_steps(),
        sources = config.sources.len(),
        "Configuration validated"
    );

    let run_id = Uuid::now_v7();
    let started_at = Utc::now();
    let run_dir = config.run.output_dir.join(run_id.to_string());
    let sink = JsonDirectorySink::create(&run_dir)
        .map_err(EngineError::from)
        .with_context(|| format!("creating {}", run_dir.display()))?;
    info!(run_id = %run_id, dir = %sink.dir().display(), "Run directory created");

    let assembly = setup::assemble(&config, Box::new(sink)).context("assembling the reference population")?;
    let n_users = assembly.n_users;

    let mut orchestrator = Orchestrator::new(&config, assembly.network, assembly.collaborators)
        .context("initializing the orchestrator")?;
    let summary = orchestrator.run().context("running the assimilation")?;

    let manifest = RunManifest::new(run_id, &config, n_users, started_at, Utc::now(), &summary);
    let manifest_path = manifest
        .write(&run_dir)
        .map_err(EngineError::from)
        .context("writing the run manifest")?;

    info!(
        run_id = %run_id,
        manifest = %manifest_path.display(),
        steps = summary.steps,
        updates = summary.updates,
        "contagion-engine shutdown complete"
    );

    Ok(())
}

/// Load the configuration at `path`, or the defaults if it does not exist.
///
/// Returns whether the file was found.
fn load_config(path: &Path) -> Result<(AssimilationConfig, bool), EngineError> {
    if path.exists() {
        Ok((AssimilationConfig::from_file(path)?, true))
    } else {
        let mut config = AssimilationConfig::default();
        config.run.apply_env_overrides();
        Ok((config, false))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }
}

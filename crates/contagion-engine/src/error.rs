//! Error types for the engine binary.
//!
//! [`EngineError`] covers the failures of engine startup that happen before
//! the orchestrator takes over. `main` adds context with `anyhow`.

/// Top-level error for engine startup.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: contagion_core::ConfigError,
    },

    /// Building the reference population failed.
    #[error("population error: {source}")]
    Population {
        /// The underlying model error.
        #[from]
        source: contagion_models::ModelError,
    },

    /// Preparing or writing run output failed.
    #[error("output error: {source}")]
    Output {
        /// The underlying sink error.
        #[from]
        source: contagion_core::SinkError,
    },
}

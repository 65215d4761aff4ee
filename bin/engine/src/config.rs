//! Application configuration.
//!
//! Composes the library configs into one [`AppConfig`], loaded via the
//! `config` crate from an optional file layered under `AUTOFLOW__*`
//! environment variables (`AUTOFLOW__ENGINE__MAX_CONCURRENCY=4`).

use autoflow_ai::AiConfig;
use autoflow_sandbox::SandboxConfig;
use autoflow_workflow::EngineConfig;
use serde::Deserialize;
use std::path::Path;

/// Runner configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection URL. Without it, runs are kept in memory.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub ai: AiConfig,
}

impl AppConfig {
    /// Loads configuration from `file` (if given) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or a value is invalid.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(file, "AUTOFLOW")
    }

    fn load_with_env(file: Option<&Path>, prefix: &str) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

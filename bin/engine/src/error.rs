//! Errors surfaced by the command-line runner.

use std::fmt;
use std::path::PathBuf;

/// Command failures.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded.
    Config,
    /// A workflow or input file could not be read.
    ReadFile { path: PathBuf },
    /// A workflow file is not a valid workflow document.
    ParseWorkflow { path: PathBuf, details: String },
    /// `--input` or `--input-file` is not JSON.
    InvalidInput { details: String },
    /// A run id argument is malformed.
    InvalidRunId { run_id: String },
    /// The command needs `database_url` and none is configured.
    DatabaseRequired,
    /// Connecting to or migrating the database failed.
    Database,
    /// The engine rejected or lost the run.
    Engine,
    /// A collaborator could not be constructed.
    Setup { details: String },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "failed to load configuration"),
            Self::ReadFile { path } => write!(f, "failed to read {}", path.display()),
            Self::ParseWorkflow { path, details } => {
                write!(f, "{} is not a valid workflow: {details}", path.display())
            }
            Self::InvalidInput { details } => write!(f, "run input is not valid JSON: {details}"),
            Self::InvalidRunId { run_id } => write!(f, "invalid run id '{run_id}'"),
            Self::DatabaseRequired => {
                write!(f, "this command needs database_url (AUTOFLOW__DATABASE_URL)")
            }
            Self::Database => write!(f, "database unavailable"),
            Self::Engine => write!(f, "engine request failed"),
            Self::Setup { details } => write!(f, "setup failed: {details}"),
        }
    }
}

impl std::error::Error for CliError {}

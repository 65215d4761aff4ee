//! Sandbox configuration.
//!
//! The package allowlists are construction-time configuration: a runner is
//! built from a [`SandboxConfig`] and never consults global state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Languages the sandbox can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    /// File name of the generated entry script inside the workspace.
    #[must_use]
    pub fn script_name(&self) -> &'static str {
        match self {
            Self::Python => "main.py",
            Self::JavaScript => "main.js",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::JavaScript => write!(f, "javascript"),
        }
    }
}

/// How one language is run and which packages it may install.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LanguageConfig {
    /// Interpreter program followed by leading arguments. The script path is
    /// appended as the final argument.
    pub interpreter: Vec<String>,
    /// Packages user code may request. Anything else is dropped.
    pub allowed_packages: Vec<String>,
}

impl LanguageConfig {
    /// CPython with the data/scraping packages users most often ask for.
    #[must_use]
    pub fn python() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            allowed_packages: [
                "requests",
                "pandas",
                "numpy",
                "beautifulsoup4",
                "flask",
                "sqlalchemy",
                "pytesseract",
                "openai",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }

    /// Node.js with a small set of utility packages.
    #[must_use]
    pub fn javascript() -> Self {
        Self {
            interpreter: vec!["node".to_string()],
            allowed_packages: ["axios", "lodash", "moment", "csv-parser", "pdf2pic"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Configuration for the code sandbox runner.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock budget for one execution, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Cap on captured stdout and stderr, each, in bytes. Code that writes
    /// more is killed.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Parent directory for disposable workspaces. Defaults to the system
    /// temp directory.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// When set, artifacts are copied here before the workspace is removed.
    #[serde(default)]
    pub artifact_root: Option<PathBuf>,

    /// Whether generated scripts install the allowed packages before running.
    #[serde(default = "default_install_packages")]
    pub install_packages: bool,

    #[serde(default = "LanguageConfig::python")]
    pub python: LanguageConfig,

    #[serde(default = "LanguageConfig::javascript")]
    pub javascript: LanguageConfig,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_install_packages() -> bool {
    true
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            workspace_root: None,
            artifact_root: None,
            install_packages: default_install_packages(),
            python: LanguageConfig::python(),
            javascript: LanguageConfig::javascript(),
        }
    }
}

impl SandboxConfig {
    /// Returns the per-language settings.
    #[must_use]
    pub fn language(&self, language: Language) -> &LanguageConfig {
        match language {
            Language::Python => &self.python,
            Language::JavaScript => &self.javascript,
        }
    }

    /// Default execution budget.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Filters requested packages down to the language allowlist, keeping
    /// request order and dropping duplicates.
    #[must_use]
    pub fn allowed_packages(&self, language: Language, requested: &[String]) -> Vec<String> {
        let allowlist = &self.language(language).allowed_packages;
        let mut allowed: Vec<String> = Vec::new();
        for package in requested {
            if allowlist.contains(package) && !allowed.contains(package) {
                allowed.push(package.clone());
            } else if !allowlist.contains(package) {
                tracing::debug!(%language, package = %package, "dropping package outside allowlist");
            }
        }
        allowed
    }
}

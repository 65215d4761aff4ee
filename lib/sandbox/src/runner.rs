//! Time-boxed execution of user code in a disposable workspace.

use crate::config::{Language, SandboxConfig};
use crate::error::SandboxError;
use crate::script::{self, INPUT_FILE};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// A request to run a snippet of user code.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeRequest {
    pub language: Language,
    pub code: String,
    /// Requested packages; filtered against the allowlist before install.
    pub packages: Vec<String>,
    /// Made available to the code as `input_data` / `inputData`.
    pub input: JsonValue,
    /// Shortens the configured budget when set; never extends it.
    pub timeout: Option<Duration>,
}

impl CodeRequest {
    /// Creates a request with no packages and the default budget.
    #[must_use]
    pub fn new(language: Language, code: impl Into<String>, input: JsonValue) -> Self {
        Self {
            language,
            code: code.into(),
            packages: Vec::new(),
            input,
            timeout: None,
        }
    }

    /// Sets the requested packages.
    #[must_use]
    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    /// Sets a per-request budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A file the code left behind in its workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// File name relative to the workspace.
    pub name: String,
    /// Stable reference, `workspace://<name>`.
    pub uri: String,
    pub size_bytes: u64,
    /// Where the file was copied, when an artifact root is configured.
    pub stored_at: Option<PathBuf>,
}

/// Captured result of a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub artifacts: Vec<Artifact>,
    pub duration_ms: u64,
}

/// Anything that can execute a [`CodeRequest`].
///
/// The workflow engine depends on this trait so tests can substitute a
/// deterministic runner.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Runs the code to completion or until its budget is spent.
    async fn run(&self, request: CodeRequest) -> Result<SandboxOutput, SandboxError>;
}

/// Runs code with a local interpreter in a fresh temporary directory.
///
/// The workspace is a [`tempfile::TempDir`], so it is removed on every exit
/// path. The child is spawned with `kill_on_drop`, so abandoning the future
/// (timeout or cancellation) kills the process.
#[derive(Debug, Clone, Default)]
pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    /// Creates a runner from configuration.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Returns the runner's configuration.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn create_workspace(&self) -> Result<tempfile::TempDir, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("autoflow-");
        let result = match &self.config.workspace_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        result.map_err(|e| SandboxError::Workspace {
            message: e.to_string(),
        })
    }

    async fn prepare(&self, workspace: &Path, request: &CodeRequest) -> Result<(), SandboxError> {
        let packages = self
            .config
            .allowed_packages(request.language, &request.packages);
        let packages = if self.config.install_packages {
            packages
        } else {
            Vec::new()
        };

        let input = serde_json::to_vec(&request.input).map_err(|e| SandboxError::Workspace {
            message: format!("failed to encode input: {e}"),
        })?;
        tokio::fs::write(workspace.join(INPUT_FILE), input)
            .await
            .map_err(|e| SandboxError::Workspace {
                message: e.to_string(),
            })?;

        let source = script::render(request.language, &request.code, &packages);
        tokio::fs::write(workspace.join(request.language.script_name()), source)
            .await
            .map_err(|e| SandboxError::Workspace {
                message: e.to_string(),
            })
    }

    fn command(&self, workspace: &Path, language: Language) -> Result<Command, SandboxError> {
        let interpreter = &self.config.language(language).interpreter;
        let Some((program, args)) = interpreter.split_first() else {
            return Err(SandboxError::Spawn {
                message: format!("no interpreter configured for {language}"),
            });
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(language.script_name())
            .current_dir(workspace)
            .env("AUTOFLOW_INPUT", workspace.join(INPUT_FILE))
            .env("AUTOFLOW_WORKSPACE", workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }

    async fn collect_artifacts(
        &self,
        workspace: &Path,
        language: Language,
    ) -> Result<Vec<Artifact>, SandboxError> {
        let io_err = |e: std::io::Error| SandboxError::Workspace {
            message: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(workspace).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name == INPUT_FILE || name == language.script_name() {
                continue;
            }
            let metadata = entry.metadata().await.map_err(io_err)?;
            if metadata.is_file() {
                names.push((name, metadata.len()));
            }
        }
        names.sort();

        let store_dir = match &self.config.artifact_root {
            Some(root) => {
                let token = workspace
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let dir = root.join(token);
                if !names.is_empty() {
                    tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
                }
                Some(dir)
            }
            None => None,
        };

        let mut artifacts = Vec::with_capacity(names.len());
        for (name, size_bytes) in names {
            let stored_at = match &store_dir {
                Some(dir) => {
                    let target = dir.join(&name);
                    tokio::fs::copy(workspace.join(&name), &target)
                        .await
                        .map_err(io_err)?;
                    Some(target)
                }
                None => None,
            };
            artifacts.push(Artifact {
                uri: format!("workspace://{name}"),
                name,
                size_bytes,
                stored_at,
            });
        }
        Ok(artifacts)
    }
}

enum Capture {
    Overflow,
    Io(std::io::Error),
}

/// Drains a child pipe, reading at most one byte past `limit`.
async fn read_capped<R>(pipe: Option<R>, limit: usize) -> Result<Vec<u8>, Capture>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        let bound = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
        pipe.take(bound)
            .read_to_end(&mut buf)
            .await
            .map_err(Capture::Io)?;
    }
    if buf.len() > limit {
        return Err(Capture::Overflow);
    }
    Ok(buf)
}

#[async_trait]
impl CodeRunner for SandboxRunner {
    async fn run(&self, request: CodeRequest) -> Result<SandboxOutput, SandboxError> {
        let cap = self.config.timeout();
        let budget = request.timeout.map_or(cap, |t| t.min(cap));
        let workspace = self.create_workspace()?;
        tracing::debug!(
            language = %request.language,
            workspace = %workspace.path().display(),
            "prepared sandbox workspace"
        );

        self.prepare(workspace.path(), &request).await?;
        let mut command = self.command(workspace.path(), request.language)?;

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| SandboxError::Spawn {
            message: e.to_string(),
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.config.max_output_bytes;

        // Returning early drops `child`, which kills it.
        let collected = tokio::time::timeout(budget, async {
            tokio::try_join!(
                read_capped(stdout, limit),
                read_capped(stderr, limit),
                async { child.wait().await.map_err(Capture::Io) },
            )
        })
        .await;
        let (stdout, stderr, status) = match collected {
            Ok(Ok(parts)) => parts,
            Ok(Err(Capture::Overflow)) => {
                tracing::warn!(language = %request.language, limit, "sandboxed code exceeded the output cap");
                return Err(SandboxError::OutputLimit { limit_bytes: limit });
            }
            Ok(Err(Capture::Io(e))) => {
                return Err(SandboxError::Spawn {
                    message: e.to_string(),
                });
            }
            Err(_) => {
                let after_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(language = %request.language, after_ms, "sandboxed code timed out");
                return Err(SandboxError::Timeout { after_ms });
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if !status.success() {
            return Err(SandboxError::NonZeroExit {
                exit_code: status.code(),
                stderr,
            });
        }

        let artifacts = self
            .collect_artifacts(workspace.path(), request.language)
            .await?;

        if let Err(e) = workspace.close() {
            tracing::warn!(error = %e, "failed to remove sandbox workspace");
        }

        Ok(SandboxOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or_default(),
            artifacts,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfig;
    use serde_json::json;

    /// Runs `sh -c <script>` instead of a real interpreter; the generated
    /// entry script is passed as `$1` and ignored.
    fn shell_runner(root: &Path, script: &str) -> SandboxRunner {
        SandboxRunner::new(SandboxConfig {
            workspace_root: Some(root.to_path_buf()),
            python: LanguageConfig {
                interpreter: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    script.to_string(),
                    "sandbox".to_string(),
                ],
                allowed_packages: vec!["requests".to_string()],
            },
            ..SandboxConfig::default()
        })
    }

    fn workspace_count(root: &Path) -> usize {
        std::fs::read_dir(root).expect("read root").count()
    }

    #[tokio::test]
    async fn captures_output_and_removes_workspace() {
        let root = tempfile::tempdir().expect("tempdir");
        let runner = shell_runner(root.path(), "echo hello; echo careful >&2");

        let output = runner
            .run(CodeRequest::new(Language::Python, "ignored", json!({})))
            .await
            .expect("run succeeds");

        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "careful\n");
        assert_eq!(output.exit_code, 0);
        assert!(output.artifacts.is_empty());
        assert_eq!(workspace_count(root.path()), 0);
    }

    #[tokio::test]
    async fn input_is_written_for_the_code() {
        let root = tempfile::tempdir().expect("tempdir");
        let runner = shell_runner(root.path(), "cat \"$AUTOFLOW_INPUT\"");

        let output = runner
            .run(CodeRequest::new(Language::Python, "ignored", json!({"n": 1})))
            .await
            .expect("run succeeds");

        assert_eq!(output.stdout, r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn files_left_behind_become_artifacts() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = tempfile::tempdir().expect("tempdir");
        let mut runner = shell_runner(root.path(), "echo data > report.csv; touch .hidden");
        runner.config.artifact_root = Some(store.path().to_path_buf());

        let output = runner
            .run(CodeRequest::new(Language::Python, "ignored", json!(null)))
            .await
            .expect("run succeeds");

        assert_eq!(output.artifacts.len(), 1);
        let artifact = &output.artifacts[0];
        assert_eq!(artifact.name, "report.csv");
        assert_eq!(artifact.uri, "workspace://report.csv");
        let stored = artifact.stored_at.as_ref().expect("copied");
        assert_eq!(std::fs::read_to_string(stored).expect("read"), "data\n");
        assert_eq!(workspace_count(root.path()), 0);
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let root = tempfile::tempdir().expect("tempdir");
        let runner = shell_runner(root.path(), "echo boom >&2; exit 3");

        let err = runner
            .run(CodeRequest::new(Language::Python, "ignored", json!({})))
            .await
            .expect_err("run fails");

        assert_eq!(
            err,
            SandboxError::NonZeroExit {
                exit_code: Some(3),
                stderr: "boom\n".to_string(),
            }
        );
        assert_eq!(workspace_count(root.path()), 0);
    }

    #[tokio::test]
    async fn over_budget_code_is_killed() {
        let root = tempfile::tempdir().expect("tempdir");
        let runner = shell_runner(root.path(), "exec sleep 5");

        let started = Instant::now();
        let err = runner
            .run(
                CodeRequest::new(Language::Python, "ignored", json!({}))
                    .with_timeout(Duration::from_millis(200)),
            )
            .await
            .expect_err("run times out");

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(workspace_count(root.path()), 0);
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_spawn_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let runner = SandboxRunner::new(SandboxConfig {
            workspace_root: Some(root.path().to_path_buf()),
            javascript: LanguageConfig {
                interpreter: vec!["autoflow-no-such-interpreter".to_string()],
                allowed_packages: Vec::new(),
            },
            ..SandboxConfig::default()
        });

        let err = runner
            .run(CodeRequest::new(Language::JavaScript, "1", json!({})))
            .await
            .expect_err("spawn fails");

        assert!(matches!(err, SandboxError::Spawn { .. }));
        assert_eq!(workspace_count(root.path()), 0);
    }

    #[tokio::test]
    async fn request_timeout_cannot_extend_the_configured_cap() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut runner = shell_runner(root.path(), "sleep 2; echo late");
        runner.config.timeout_secs = 1;

        let err = runner
            .run(
                CodeRequest::new(Language::Python, "ignored", json!({}))
                    .with_timeout(Duration::from_secs(5)),
            )
            .await
            .expect_err("capped at one second");

        assert_eq!(err, SandboxError::Timeout { after_ms: 1_000 });
        assert_eq!(workspace_count(root.path()), 0);
    }

    #[tokio::test]
    async fn runaway_output_is_killed_at_the_cap() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut runner = shell_runner(root.path(), "exec yes overflow");
        runner.config.max_output_bytes = 4096;

        let started = Instant::now();
        let err = runner
            .run(CodeRequest::new(Language::Python, "ignored", json!({})))
            .await
            .expect_err("output cap");

        assert_eq!(err, SandboxError::OutputLimit { limit_bytes: 4096 });
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(workspace_count(root.path()), 0);
    }

    #[tokio::test]
    async fn output_at_the_cap_is_kept() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut runner = shell_runner(root.path(), "printf abcd");
        runner.config.max_output_bytes = 4;

        let output = runner
            .run(CodeRequest::new(Language::Python, "ignored", json!({})))
            .await
            .expect("run succeeds");

        assert_eq!(output.stdout, "abcd");
    }
}

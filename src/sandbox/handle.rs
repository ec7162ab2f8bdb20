//! Sandbox handle - one live isolated environment and everything in it
//!
//! A `Sandbox` is created once per run, owned exclusively by the
//! orchestrator, and released exactly once when the run ends:
//! Live -> Released. A failed teardown still counts as the release; the
//! handle never issues a second destroy for the same environment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::runtime::{ContainerRuntime, ExecOutput, RuntimeError, SandboxSpec};
use super::transfer;
use crate::metrics::{SANDBOXES_ACTIVE, SANDBOX_EXEC_DURATION};

/// Error type for sandbox operations
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The environment could not be started
    #[error("failed to provision sandbox: {0}")]
    Provision(String),
    /// The environment itself is unreachable (destroyed, crashed)
    #[error("sandbox unreachable: {0}")]
    Execution(String),
    /// Content could not be decoded/written at the destination
    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },
    /// The path does not exist inside the environment
    #[error("no such file or directory: {path}")]
    NotFound { path: String },
    /// The path exists but could not be read or listed
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },
}

impl SandboxError {
    /// True when the failure belongs to one action rather than the environment
    pub fn is_action_level(&self) -> bool {
        matches!(
            self,
            SandboxError::Write { .. } | SandboxError::NotFound { .. } | SandboxError::Read { .. }
        )
    }
}

/// A live isolated environment
pub struct Sandbox {
    id: String,
    runtime: Arc<dyn ContainerRuntime>,
    exec_timeout: Duration,
    /// A destroy has been issued (successful or not)
    released: bool,
    /// The runtime confirmed the teardown
    destroyed: bool,
    created_at: Instant,
}

impl Sandbox {
    /// Start a new environment
    ///
    /// # Arguments
    /// * `runtime` - Isolation backend (Docker, local process, ...)
    /// * `spec` - Image, keep-alive command and working directory
    /// * `exec_timeout` - Upper bound for every command run inside
    pub async fn create(
        runtime: Arc<dyn ContainerRuntime>,
        spec: &SandboxSpec,
        exec_timeout: Duration,
    ) -> Result<Self, SandboxError> {
        let id = runtime
            .create(spec)
            .await
            .map_err(|e| SandboxError::Provision(e.to_string()))?;

        SANDBOXES_ACTIVE.inc();
        info!(sandbox = %id, runtime = runtime.name(), image = %spec.image, "Sandbox created");

        Ok(Self {
            id,
            runtime,
            exec_timeout,
            released: false,
            destroyed: false,
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// True once a destroy has been attempted, even if it failed
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Time since the environment was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Run a shell command and wait for it
    ///
    /// Command failure (non-zero exit, timeout) is reported in the output.
    /// Only an unreachable environment is an error.
    pub async fn execute(&self, command: &str) -> Result<ExecOutput, SandboxError> {
        self.exec_argv(&transfer::shell_command(command)).await
    }

    /// Write `content` to `path`, creating parent directories
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let commands = transfer::write_commands(path, content.as_bytes());
        debug!(sandbox = %self.id, path, bytes = content.len(), chunks = commands.len(), "Writing file");

        for argv in &commands {
            let out = self.exec_argv(argv).await?;
            if !out.success() {
                let reason = if out.timed_out {
                    "timed out while decoding".to_string()
                } else {
                    format!("decoder exited with {}: {}", out.exit_code, out.stderr.trim())
                };
                return Err(SandboxError::Write {
                    path: path.to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Return the content of `path`
    pub async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let out = self.exec_argv(&transfer::read_command(path)).await?;
        Self::guarded_output(path, out)
    }

    /// Return a recursive listing of `path` as plain text
    pub async fn list_files(&self, path: &str) -> Result<String, SandboxError> {
        let out = self.exec_argv(&transfer::list_command(path)).await?;
        Self::guarded_output(path, out)
    }

    /// Tear the environment down. Calling it again is a no-op.
    ///
    /// The runtime is asked exactly once. If that call fails the error is
    /// returned, the handle stays released and `Drop` will not retry.
    pub async fn destroy(&mut self) -> Result<(), SandboxError> {
        if self.released {
            debug!(sandbox = %self.id, destroyed = self.destroyed, "Sandbox already released");
            return Ok(());
        }
        self.released = true;
        SANDBOXES_ACTIVE.dec();
        self.runtime
            .destroy(&self.id)
            .await
            .map_err(|e| SandboxError::Execution(format!("failed to destroy {}: {}", self.id, e)))?;
        self.destroyed = true;
        info!(sandbox = %self.id, age_ms = self.age().as_millis() as u64, "Sandbox destroyed");
        Ok(())
    }

    async fn exec_argv(&self, argv: &[String]) -> Result<ExecOutput, SandboxError> {
        if self.released {
            return Err(SandboxError::Execution(format!(
                "sandbox {} has been destroyed",
                self.id
            )));
        }

        let start = Instant::now();
        let result = tokio::time::timeout(self.exec_timeout, self.runtime.exec(&self.id, argv)).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        SANDBOX_EXEC_DURATION
            .with_label_values(&[self.runtime.name()])
            .observe(duration_ms / 1000.0);

        match result {
            Ok(Ok(mut out)) => {
                out.duration_ms = duration_ms;
                Ok(out)
            }
            Ok(Err(RuntimeError::ContainerGone(id))) => {
                Err(SandboxError::Execution(format!("container {} is gone", id)))
            }
            Ok(Err(e)) => Err(SandboxError::Execution(e.to_string())),
            Err(_) => {
                warn!(sandbox = %self.id, timeout_secs = self.exec_timeout.as_secs(), "Command timed out");
                Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: format!("command timed out after {}s", self.exec_timeout.as_secs()),
                    exit_code: -1,
                    duration_ms,
                    timed_out: true,
                })
            }
        }
    }

    fn guarded_output(path: &str, out: ExecOutput) -> Result<String, SandboxError> {
        match out.exit_code {
            0 => Ok(out.stdout),
            transfer::MISSING_PATH_EXIT => Err(SandboxError::NotFound {
                path: path.to_string(),
            }),
            code => Err(SandboxError::Read {
                path: path.to_string(),
                reason: if out.timed_out {
                    out.stderr
                } else {
                    format!("exit code {}: {}", code, out.stderr.trim())
                },
            }),
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(sandbox = %self.id, "Sandbox dropped without destroy; scheduling cleanup");
        SANDBOXES_ACTIVE.dec();
        let runtime = Arc::clone(&self.runtime);
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = runtime.destroy(&id).await {
                        warn!(sandbox = %id, error = %e, "Deferred sandbox cleanup failed");
                    }
                });
            }
            Err(_) => warn!(sandbox = %id, "No async runtime available; sandbox leaked"),
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("runtime", &self.runtime.name())
            .field("exec_timeout", &self.exec_timeout)
            .field("released", &self.released)
            .field("destroyed", &self.destroyed)
            .field("age", &self.age())
            .finish()
    }
}

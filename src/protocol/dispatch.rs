//! Dispatch of validated actions to the sandbox
//!
//! Every write is followed by an automatic test run, so a patch is judged
//! by the test outcome in the same step rather than waiting for the agent
//! to ask for `run_test`.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::{Action, ActionResult, ProtocolError};
use crate::sandbox::{ExecOutput, Sandbox, SandboxError};

/// Exit status recorded for an action that failed before running anything
const ACTION_FAILED_EXIT: i32 = 1;

/// Error type for dispatch
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Routes actions to sandbox operations and judges their outcome
#[derive(Debug, Clone)]
pub struct Dispatcher {
    test_command: String,
    success_marker: String,
    auto_verify: bool,
}

impl Dispatcher {
    /// # Arguments
    /// * `test_command` - Command run for auto-verification after writes
    /// * `success_marker` - Literal the test prints on its success path
    pub fn new(test_command: impl Into<String>, success_marker: impl Into<String>) -> Self {
        Self {
            test_command: test_command.into(),
            success_marker: success_marker.into(),
            auto_verify: true,
        }
    }

    pub fn with_auto_verify(mut self, auto_verify: bool) -> Self {
        self.auto_verify = auto_verify;
        self
    }

    pub fn success_marker(&self) -> &str {
        &self.success_marker
    }

    /// A test passed only if it exited 0 *and* printed the marker
    pub fn is_success(&self, out: &ExecOutput) -> bool {
        out.exit_code == 0 && !out.timed_out && out.stdout.contains(&self.success_marker)
    }

    /// Execute `action` in `sandbox` and wrap the outcome
    ///
    /// Failures that belong to the action (missing file, failed decode) come
    /// back as an unsuccessful `ActionResult` so the agent can see them.
    /// An unreachable sandbox is returned as an error.
    pub async fn dispatch(&self, sandbox: &Sandbox, action: &Action) -> Result<ActionResult, DispatchError> {
        action.validate()?;
        let start = Instant::now();

        let result = match action {
            Action::ListFiles { path } => {
                let listing = sandbox.list_files(path).await;
                self.inspection_result(action, listing)?
            }
            Action::ReadFile { path } => {
                let content = sandbox.read_file(path).await;
                self.inspection_result(action, content)?
            }
            Action::RunTest { command } => {
                let out = sandbox.execute(command).await?;
                let succeeded = self.is_success(&out);
                info!(exit_code = out.exit_code, succeeded, "Test run finished");
                ActionResult {
                    action: action.clone(),
                    stdout: out.combined(),
                    exit_code: out.exit_code,
                    succeeded,
                    duration_ms: 0.0,
                }
            }
            Action::WriteFile { path, content } => match sandbox.write_file(path, content).await {
                Ok(()) => self.verify_write(sandbox, action, path, content.len()).await,
                Err(e) if e.is_action_level() => failed(action, e),
                Err(e) => return Err(e.into()),
            },
        };

        Ok(ActionResult {
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            ..result
        })
    }

    /// The write already changed the sandbox, so a verify failure is folded
    /// into the result instead of discarding the step.
    async fn verify_write(&self, sandbox: &Sandbox, action: &Action, path: &str, bytes: usize) -> ActionResult {
        let written = format!("Wrote {} bytes to {}.", bytes, path);
        if !self.auto_verify {
            return ActionResult {
                action: action.clone(),
                stdout: written,
                exit_code: 0,
                succeeded: false,
                duration_ms: 0.0,
            };
        }

        debug!(path, command = %self.test_command, "Auto-verifying write");
        let out = match sandbox.execute(&self.test_command).await {
            Ok(out) => out,
            Err(e) => {
                warn!(path, error = %e, "Auto-verify could not run");
                return ActionResult {
                    action: action.clone(),
                    stdout: format!("{}\n[auto-verify] {}\nError: {}", written, self.test_command, e),
                    exit_code: ACTION_FAILED_EXIT,
                    succeeded: false,
                    duration_ms: 0.0,
                };
            }
        };
        let succeeded = self.is_success(&out);
        info!(path, exit_code = out.exit_code, succeeded, "Auto-verify finished");

        ActionResult {
            action: action.clone(),
            stdout: format!("{}\n[auto-verify] {}\n{}", written, self.test_command, out.combined()),
            exit_code: out.exit_code,
            succeeded,
            duration_ms: 0.0,
        }
    }

    fn inspection_result(
        &self,
        action: &Action,
        outcome: Result<String, SandboxError>,
    ) -> Result<ActionResult, SandboxError> {
        match outcome {
            Ok(stdout) => Ok(ActionResult {
                action: action.clone(),
                stdout,
                exit_code: 0,
                succeeded: true,
                duration_ms: 0.0,
            }),
            Err(e) if e.is_action_level() => Ok(failed(action, e)),
            Err(e) => Err(e),
        }
    }
}

fn failed(action: &Action, error: SandboxError) -> ActionResult {
    ActionResult {
        action: action.clone(),
        stdout: format!("Error: {}", error),
        exit_code: ACTION_FAILED_EXIT,
        succeeded: false,
        duration_ms: 0.0,
    }
}

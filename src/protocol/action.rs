//! Action vocabulary and per-step results

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// A validated instruction the agent may issue against the sandbox
///
/// Build actions through the checked constructors (or
/// [`parse_decision`](super::parse_decision)); deserializing goes through
/// the same checks. `validate` re-checks the invariants before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", try_from = "UncheckedAction")]
pub enum Action {
    ListFiles {
        path: String,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    RunTest {
        #[serde(rename = "cmd")]
        command: String,
    },
}

/// Wire shape of an action before validation
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum UncheckedAction {
    ListFiles { path: String },
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    RunTest { cmd: String },
}

impl TryFrom<UncheckedAction> for Action {
    type Error = ProtocolError;

    fn try_from(raw: UncheckedAction) -> Result<Self, Self::Error> {
        match raw {
            UncheckedAction::ListFiles { path } => Action::list_files(path),
            UncheckedAction::ReadFile { path } => Action::read_file(path),
            UncheckedAction::WriteFile { path, content } => Action::write_file(path, content),
            UncheckedAction::RunTest { cmd } => Action::run_test(cmd),
        }
    }
}

impl Action {
    pub fn list_files(path: impl Into<String>) -> Result<Self, ProtocolError> {
        let action = Action::ListFiles { path: path.into() };
        action.validate()?;
        Ok(action)
    }

    pub fn read_file(path: impl Into<String>) -> Result<Self, ProtocolError> {
        let action = Action::ReadFile { path: path.into() };
        action.validate()?;
        Ok(action)
    }

    pub fn write_file(path: impl Into<String>, content: impl Into<String>) -> Result<Self, ProtocolError> {
        let action = Action::WriteFile {
            path: path.into(),
            content: content.into(),
        };
        action.validate()?;
        Ok(action)
    }

    pub fn run_test(command: impl Into<String>) -> Result<Self, ProtocolError> {
        let action = Action::RunTest {
            command: command.into(),
        };
        action.validate()?;
        Ok(action)
    }

    /// Wire name of this action's kind
    pub fn kind(&self) -> &'static str {
        match self {
            Action::ListFiles { .. } => "list_files",
            Action::ReadFile { .. } => "read_file",
            Action::WriteFile { .. } => "write_file",
            Action::RunTest { .. } => "run_test",
        }
    }

    /// Target path, if the action has one
    pub fn path(&self) -> Option<&str> {
        match self {
            Action::ListFiles { path } | Action::ReadFile { path } | Action::WriteFile { path, .. } => {
                Some(path)
            }
            Action::RunTest { .. } => None,
        }
    }

    /// Whether a successful result of this action proves the task is solved
    pub fn is_verifying(&self) -> bool {
        matches!(self, Action::RunTest { .. } | Action::WriteFile { .. })
    }

    /// Check that every required field is present and non-empty
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Action::ListFiles { path } | Action::ReadFile { path } => require("path", path),
            Action::WriteFile { path, content } => {
                require("path", path)?;
                require("content", content)
            }
            Action::RunTest { command } => require("cmd", command),
        }
    }

    /// One-line description for logs and prompts
    pub fn summary(&self) -> String {
        match self {
            Action::ListFiles { path } => format!("list_files {}", path),
            Action::ReadFile { path } => format!("read_file {}", path),
            Action::WriteFile { path, content } => {
                format!("write_file {} ({} bytes)", path, content.len())
            }
            Action::RunTest { command } => format!("run_test {}", command),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

fn require(field: &str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::MalformedInput(format!(
            "field `{}` must not be empty",
            field
        )));
    }
    Ok(())
}

/// Outcome of dispatching one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: Action,
    /// What the agent observes: command output, file content or error text
    pub stdout: String,
    pub exit_code: i32,
    /// Computed by the dispatcher: marker + exit status for verifying
    /// actions, absence of error for inspection actions
    pub succeeded: bool,
    pub duration_ms: f64,
}

impl ActionResult {
    /// True when this step solved the task
    ///
    /// Inspection actions can succeed without proving anything, so only
    /// verifying actions end the run.
    pub fn reached_goal(&self) -> bool {
        self.succeeded && self.action.is_verifying()
    }
}

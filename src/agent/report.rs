//! Run reports
//!
//! The final outcome of a run together with its full history, saved as
//! pretty JSON so a run can be inspected after the fact.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::history::HistoryEntry;

/// Terminal outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A verifying action printed the success marker
    Succeeded { steps_used: usize },
    /// The step budget ran out first
    Exhausted { steps_used: usize },
    /// The run could not continue
    Fatal { reason: String },
}

impl RunOutcome {
    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded { .. } => "succeeded",
            RunOutcome::Exhausted { .. } => "exhausted",
            RunOutcome::Fatal { .. } => "fatal",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    /// Process exit status for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Succeeded { .. } => 0,
            RunOutcome::Exhausted { .. } => 1,
            RunOutcome::Fatal { .. } => 2,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded { steps_used } => write!(f, "Succeeded after {} step(s)", steps_used),
            RunOutcome::Exhausted { steps_used } => {
                write!(f, "Exhausted: no success after {} step(s)", steps_used)
            }
            RunOutcome::Fatal { reason } => write!(f, "Fatal: {}", reason),
        }
    }
}

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique trace ID for this run
    pub trace_id: String,
    pub goal: String,
    pub model: String,
    pub outcome: RunOutcome,
    /// Every dispatched step, oldest first
    pub history: Vec<HistoryEntry>,
    /// Iterations that failed before reaching the sandbox
    pub decision_failures: usize,
    pub duration_ms: f64,
    /// Set when the sandbox could not be torn down after the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

impl RunReport {
    /// Number of dispatched steps
    pub fn steps_used(&self) -> usize {
        self.history.len()
    }

    /// Save the report to disk as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
    }

    /// Load a report saved with [`RunReport::save`]
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// One line per step, for the terminal
    pub fn summary(&self) -> String {
        let mut out = format!("[{}] {} ({}, {:.0}ms)\n", self.trace_id, self.outcome, self.model, self.duration_ms);
        if let Some(error) = &self.teardown_error {
            out.push_str(&format!("  sandbox teardown failed: {}\n", error));
        }
        for entry in &self.history {
            let mark = if entry.result.succeeded { "ok" } else { "--" };
            out.push_str(&format!(
                "  {:>2}. [{}] {} (exit {})\n",
                entry.step,
                mark,
                entry.action.summary(),
                entry.result.exit_code
            ));
        }
        out
    }
}

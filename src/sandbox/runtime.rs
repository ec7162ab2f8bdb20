//! Container runtime seam
//!
//! The sandbox only needs three primitives from whatever isolates it:
//! create-with-keepalive, synchronous exec and destroy. Commands always
//! travel as an argv vector so nothing the agent produces is spliced into
//! shell source on the host side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What to start when a sandbox is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Container image (e.g., "python:3.10-slim")
    pub image: String,
    /// Command that keeps the environment alive between execs
    pub keep_alive: Vec<String>,
    /// Working directory for every exec; relative paths resolve against it
    pub workdir: String,
    /// Optional memory cap in bytes
    pub memory_bytes: Option<u64>,
    /// Optional CPU cap (fractional cores)
    pub cpu_cores: Option<f64>,
    /// Trace ID of the run that owns this sandbox, attached as a label
    pub trace_id: Option<String>,
}

impl SandboxSpec {
    /// Build a spec from an image and a whitespace-separated keep-alive command
    pub fn new(image: impl Into<String>, keep_alive: &str) -> Self {
        Self {
            image: image.into(),
            keep_alive: keep_alive.split_whitespace().map(str::to_string).collect(),
            workdir: "/".to_string(),
            memory_bytes: None,
            cpu_cores: None,
            trace_id: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Output of one command inside the environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: f64,
    pub timed_out: bool,
}

impl ExecOutput {
    /// stdout followed by stderr, the way a terminal user would see it
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let sep = if self.stdout.ends_with('\n') { "" } else { "\n" };
                format!("{}{}{}", self.stdout, sep, self.stderr)
            }
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Error type for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime itself could not be reached (socket missing, daemon down)
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    /// The requested image does not exist and could not be pulled
    #[error("image not found: {0}")]
    ImageNotFound(String),
    /// The container was removed or stopped underneath us
    #[error("container {0} is gone")]
    ContainerGone(String),
    /// The runtime answered with an unexpected status
    #[error("runtime API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Create/exec/destroy primitives provided by an isolation backend
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Start an environment and return its identifier
    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError>;

    /// Run `argv` to completion inside the environment
    ///
    /// A failing command is reported through `exit_code`; only an
    /// unreachable environment is an error.
    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError>;

    /// Stop and remove the environment. Removing an unknown id is not an error.
    async fn destroy(&self, id: &str) -> Result<(), RuntimeError>;
}

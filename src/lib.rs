//! sandfix - autonomous code-repair agent driving a sandboxed container
//!
//! The agent runs a bounded perceive/decide/act loop: a reasoning backend
//! (Ollama) proposes the next action, the action protocol validates it, and
//! the sandbox executes it. The loop ends when the task's test prints its
//! success marker, when the step budget runs out, or when the backend keeps
//! producing unusable output.
//!
//! # Modules
//!
//! - `sandbox` - isolated execution environment and base64 file transfer
//! - `protocol` - action vocabulary, decision validation and dispatch
//! - `agent` - history buffer, orchestrator state machine, run reports
//! - `reasoning` - prompt rendering and decision interpretation
//! - `ollama` - Ollama backend for the reasoning adapter
//! - `task` - the repair exercise (seed files, test command, marker)
//! - `config` - layered configuration
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - structured logging and optional OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sandfix::{AgentController, Config, DockerRuntime, OllamaClient};
//!
//! let config = Config::default();
//! let runtime = Arc::new(DockerRuntime::new(&config.sandbox.docker_socket));
//! let backend = Arc::new(OllamaClient::from_config(&config.backend)?);
//! let controller = AgentController::from_config(&config, backend, runtime)?;
//! let report = controller.run().await;
//! println!("{}", report.outcome);
//! ```

pub mod agent;
pub mod config;
pub mod metrics;
pub mod ollama;
pub mod protocol;
pub mod reasoning;
pub mod sandbox;
pub mod task;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, RunOutcome, RunReport};
pub use config::Config;
pub use ollama::OllamaClient;
pub use protocol::{Action, ActionResult};
pub use sandbox::{DockerRuntime, ProcessRuntime, Sandbox};
pub use task::TaskSpec;

//! Layered configuration
//!
//! Uses `figment` for layered configuration: defaults -> `sandfix.toml` in
//! the working directory -> explicit config file -> `SANDFIX_*` environment
//! variables. Command-line flags are applied on top by the binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::ollama::{DEFAULT_MODEL, DEFAULT_OLLAMA_URL};
use crate::reasoning::{DecisionMode, DecodingConfig};
use crate::sandbox::docker::DEFAULT_DOCKER_SOCKET;
use crate::sandbox::{ContainerRuntime, DockerRuntime, ProcessRuntime, SandboxSpec};
use crate::task::TaskSpec;

/// Config file picked up from the working directory when present
pub const LOCAL_CONFIG_FILE: &str = "sandfix.toml";

/// Prefix of environment overrides (`SANDFIX_AGENT__MAX_STEPS=5`)
pub const ENV_PREFIX: &str = "SANDFIX_";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub sandbox: SandboxConfig,
    pub agent: AgentConfig,
    pub task: TaskSpec,
    pub telemetry: TelemetryConfig,
}

/// Reasoning backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Ollama base URL
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Context window requested from the model
    pub num_ctx: Option<u32>,
    pub mode: DecisionMode,
    /// Send the action JSON Schema as the output format instead of plain JSON mode
    pub constrained_schema: bool,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            num_ctx: Some(4096),
            mode: DecisionMode::Structured,
            constrained_schema: false,
            request_timeout_secs: 300,
        }
    }
}

impl BackendConfig {
    /// Sampling settings for every request
    pub fn decoding(&self) -> DecodingConfig {
        DecodingConfig {
            temperature: self.temperature,
            num_ctx: self.num_ctx,
            json_mode: self.mode == DecisionMode::Structured,
            schema: self
                .constrained_schema
                .then(crate::protocol::schema::action_json_schema),
        }
    }
}

/// Which isolation backend hosts the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Docker,
    Process,
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "process" | "local" => Ok(RuntimeKind::Process),
            other => Err(format!("unknown runtime `{}` (expected docker or process)", other)),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Docker => f.write_str("docker"),
            RuntimeKind::Process => f.write_str("process"),
        }
    }
}

/// Sandbox settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub runtime: RuntimeKind,
    pub docker_socket: String,
    pub image: String,
    /// Command that keeps the container alive between execs
    pub keep_alive: String,
    pub workdir: String,
    /// Upper bound for one command inside the sandbox
    pub exec_timeout_secs: u64,
    /// Pull the image when Docker reports it missing
    pub pull_missing_image: bool,
    pub memory_mb: Option<u64>,
    pub cpu_cores: Option<f64>,
    /// Where the process runtime creates scratch directories
    pub process_base_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Docker,
            docker_socket: DEFAULT_DOCKER_SOCKET.to_string(),
            image: "python:3.10-slim".to_string(),
            keep_alive: "tail -f /dev/null".to_string(),
            workdir: "/app".to_string(),
            exec_timeout_secs: 30,
            pull_missing_image: true,
            memory_mb: None,
            cpu_cores: None,
            process_base_dir: None,
        }
    }
}

impl SandboxConfig {
    /// Creation parameters for the sandbox
    pub fn spec(&self) -> SandboxSpec {
        let mut spec = SandboxSpec::new(&self.image, &self.keep_alive).with_workdir(&self.workdir);
        spec.memory_bytes = self.memory_mb.map(|mb| mb * 1024 * 1024);
        spec.cpu_cores = self.cpu_cores;
        spec
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    /// Instantiate the configured runtime
    pub fn build_runtime(&self) -> Arc<dyn ContainerRuntime> {
        match self.runtime {
            RuntimeKind::Docker => {
                Arc::new(DockerRuntime::new(&self.docker_socket).with_pull_missing(self.pull_missing_image))
            }
            RuntimeKind::Process => match &self.process_base_dir {
                Some(dir) => Arc::new(ProcessRuntime::new(dir)),
                None => Arc::new(ProcessRuntime::in_temp_dir()),
            },
        }
    }
}

/// Trace export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// OTLP gRPC endpoint; unset means console logging only
    pub otlp_endpoint: Option<String>,
    /// Console logs as JSON lines
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "sandfix".to_string(),
            otlp_endpoint: None,
            json_logs: false,
        }
    }
}

impl Config {
    /// Check cross-field constraints after all layers are merged
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent.validate()?;
        self.task.validate().map_err(ConfigError::Invalid)?;

        if self.backend.model.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.model must not be empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(ConfigError::Invalid(format!(
                "backend.temperature must be within 0.0..=2.0, got {}",
                self.backend.temperature
            )));
        }
        if self.sandbox.exec_timeout_secs == 0 {
            return Err(ConfigError::Invalid("sandbox.exec_timeout_secs must be at least 1".to_string()));
        }
        if self.sandbox.runtime == RuntimeKind::Docker && self.sandbox.image.trim().is_empty() {
            return Err(ConfigError::Invalid("sandbox.image must not be empty".to_string()));
        }
        if self.sandbox.cpu_cores.is_some_and(|cores| cores <= 0.0) {
            return Err(ConfigError::Invalid("sandbox.cpu_cores must be positive".to_string()));
        }
        Ok(())
    }
}

/// Load configuration from all layers.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `SANDFIX_`, `__` separates sections)
/// 2. `explicit` config file, if given (must exist)
/// 3. `sandfix.toml` in `workdir`, if present
/// 4. Built-in defaults
pub fn load_config(workdir: Option<&Path>, explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if let Some(dir) = workdir {
        let local = dir.join(LOCAL_CONFIG_FILE);
        if local.exists() {
            figment = figment.merge(Toml::file(&local));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::Invalid(format!("config file {} does not exist", path.display())));
        }
        figment = figment.merge(Toml::file(path));
    }

    // SANDFIX_BACKEND__MODEL, SANDFIX_AGENT__MAX_STEPS, ...
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

//! Sandbox module
//!
//! An isolated, disposable execution environment with its own filesystem:
//! - `runtime` - the create/exec/destroy seam and its error type
//! - `docker` - Docker Engine API implementation (Unix socket)
//! - `process` - local scratch-directory implementation
//! - `transfer` - base64 file transfer immune to shell escaping
//! - `handle` - the `Sandbox` handle owned by a single run

pub mod docker;
pub mod handle;
pub mod process;
pub mod runtime;
pub mod transfer;

pub use docker::DockerRuntime;
pub use handle::{Sandbox, SandboxError};
pub use process::ProcessRuntime;
pub use runtime::{ContainerRuntime, ExecOutput, RuntimeError, SandboxSpec};

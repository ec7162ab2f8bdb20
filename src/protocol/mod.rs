//! Action protocol
//!
//! The closed set of things the agent may do, and the gate every backend
//! reply passes before it reaches the sandbox:
//!
//! ```text
//! Decision ──parse_decision──► Action ──Dispatcher::dispatch──► ActionResult
//!    │                            │
//!    └─ MalformedInput ◄──────────┘ (never touches the sandbox)
//! ```

pub mod action;
pub mod decision;
pub mod dispatch;
pub mod schema;

pub use action::{Action, ActionResult};
pub use decision::{has_legacy_command, parse_decision, ActionDefaults, Decision};
pub use dispatch::{DispatchError, Dispatcher};

/// Error type for decision validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Unknown kind, missing field, or empty value where one is required
    #[error("malformed decision: {0}")]
    MalformedInput(String),
}

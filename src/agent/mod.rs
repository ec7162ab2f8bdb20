//! Agent module - the orchestrator and its run state
//!
//! # Architecture
//!
//! ```text
//! Task → AgentController::run → Sandbox::create → seed files
//!                  ↓
//!        History.recent_window(n) → ReasoningAdapter → Decision
//!                  ↓
//!        parse_decision → Action (or retry, no side effects)
//!                  ↓
//!        Dispatcher::dispatch → ActionResult → History.append
//!                  ↓
//!        Succeeded / Exhausted / Fatal → Sandbox::destroy → RunReport
//! ```

pub mod controller;
pub mod history;
pub mod report;

pub use controller::{AgentConfig, AgentController, LoopState, RunState, RETRY_BUDGET_REASON};
pub use history::{History, HistoryEntry};
pub use report::{RunOutcome, RunReport};

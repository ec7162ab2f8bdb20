//! Prometheus metrics for agent runs
//!
//! Collectors live in the default registry; [`render`] produces the text
//! exposition format for whoever wants to scrape or dump them.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Gauge,
    Histogram, HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Run Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished runs by outcome.
    ///
    /// Labels:
    /// - outcome: "succeeded", "exhausted" or "fatal"
    pub static ref AGENT_RUNS: IntCounterVec = register_int_counter_vec!(
        "sandfix_agent_runs_total",
        "Agent runs by terminal outcome",
        &["outcome"]
    ).expect("failed to register AGENT_RUNS metric");

    /// Dispatched steps per run.
    pub static ref AGENT_STEPS: Histogram = register_histogram!(
        "sandfix_agent_steps",
        "Steps consumed per agent run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0, 30.0]
    ).expect("failed to register AGENT_STEPS metric");

    /// Dispatched actions.
    ///
    /// Labels:
    /// - kind: list_files, read_file, write_file, run_test
    /// - result: "ok" or "failed"
    pub static ref AGENT_ACTIONS: IntCounterVec = register_int_counter_vec!(
        "sandfix_agent_actions_total",
        "Actions dispatched to the sandbox",
        &["kind", "result"]
    ).expect("failed to register AGENT_ACTIONS metric");

    /// Iterations that counted against the retry budget.
    ///
    /// Labels:
    /// - stage: "backend", "unparseable", "protocol" or "execution"
    pub static ref DECISION_FAILURES: IntCounterVec = register_int_counter_vec!(
        "sandfix_decision_failures_total",
        "Failed decision iterations by stage",
        &["stage"]
    ).expect("failed to register DECISION_FAILURES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Backend Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Wall time of one reasoning backend call, by model.
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "sandfix_llm_call_seconds",
        "Reasoning backend call duration",
        &["model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_TIME metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Duration of commands executed inside sandboxes, by runtime.
    pub static ref SANDBOX_EXEC_DURATION: HistogramVec = register_histogram_vec!(
        "sandfix_sandbox_exec_seconds",
        "Sandbox command execution duration",
        &["runtime"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register SANDBOX_EXEC_DURATION metric");

    /// Sandboxes currently provisioned and not yet destroyed.
    pub static ref SANDBOXES_ACTIVE: Gauge = register_gauge!(
        "sandfix_sandboxes_active",
        "Sandboxes currently alive"
    ).expect("failed to register SANDBOXES_ACTIVE metric");
}

/// Encode every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

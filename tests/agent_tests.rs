//! Integration tests for the agent system
//!
//! These tests verify configuration, the action vocabulary and decision
//! handling through the public API. Tests that need Ollama or Docker are
//! marked #[ignore].

use serde_json::json;

use sandfix::agent::{History, HistoryEntry};
use sandfix::config::Config;
use sandfix::protocol::{parse_decision, ActionDefaults, Decision, ProtocolError};
use sandfix::reasoning::{interpret, DecisionMode};
use sandfix::{Action, ActionResult, AgentConfig, RunOutcome, RunReport, TaskSpec};

/// Test that AgentConfig has sensible defaults
#[test]
fn test_agent_config_defaults() {
    let config = AgentConfig::default();

    assert_eq!(config.max_steps, 10);
    assert_eq!(config.history_window, 4);
    assert_eq!(config.retry_budget, 3);
    assert_eq!(config.max_observation_chars, 2000);
    assert!(config.auto_verify);
    assert!(config.run_timeout_secs.is_none());
}

/// Test that AgentConfig can be customized
#[test]
fn test_agent_config_custom() {
    let config = AgentConfig {
        max_steps: 5,
        history_window: 2,
        retry_budget: 1,
        run_timeout_secs: Some(120),
        auto_verify: false,
        max_observation_chars: 500,
    };

    assert!(config.validate().is_ok());
    assert_eq!(config.run_timeout().unwrap().as_secs(), 120);
}

/// Test that the default configuration wires the cart task
#[test]
fn test_config_default_task() {
    let config = Config::default();
    assert_eq!(config.task, TaskSpec::shopping_cart());
    assert!(config.validate().is_ok());
}

/// Test Action serialization uses the `kind` discriminator
#[test]
fn test_action_serialization() {
    let action = Action::write_file("/app/utils.py", "def f():\n    return 1\n").unwrap();
    let json = serde_json::to_value(&action).unwrap();

    assert_eq!(json["kind"], "write_file");
    assert_eq!(json["path"], "/app/utils.py");

    let run = serde_json::to_value(Action::run_test("python3 /app/main.py").unwrap()).unwrap();
    assert_eq!(run, json!({"kind": "run_test", "cmd": "python3 /app/main.py"}));
}

/// Test that checked constructors reject empty fields
#[test]
fn test_action_constructors_validate() {
    assert!(Action::read_file("").is_err());
    assert!(Action::write_file("a.py", "   ").is_err());
    assert!(Action::run_test("").is_err());
    assert!(Action::list_files(".").is_ok());
}

/// Test the raw reply → decision → action pipeline
#[test]
fn test_reply_to_action_pipeline() {
    let defaults = ActionDefaults::new("python3 /app/main.py");

    let decision = interpret(
        "```json\n{\"action\": \"read_file\", \"path\": \"/app/utils.py\"}\n```",
        DecisionMode::Structured,
    );
    assert_eq!(
        parse_decision(&decision, &defaults).unwrap(),
        Action::ReadFile {
            path: "/app/utils.py".to_string()
        }
    );

    let decision = interpret("RUN_TEST", DecisionMode::Legacy);
    assert_eq!(
        parse_decision(&decision, &defaults).unwrap(),
        Action::RunTest {
            command: "python3 /app/main.py".to_string()
        }
    );

    // A bare legacy command still works when JSON was requested
    let decision = interpret("RUN_TEST", DecisionMode::Structured);
    assert_eq!(
        parse_decision(&decision, &defaults).unwrap(),
        Action::RunTest {
            command: "python3 /app/main.py".to_string()
        }
    );

    let decision = interpret("no idea", DecisionMode::Structured);
    assert!(matches!(
        parse_decision(&decision, &defaults),
        Err(ProtocolError::MalformedInput(_))
    ));
}

/// Test that validation is pure
#[test]
fn test_parse_decision_is_deterministic() {
    let defaults = ActionDefaults::new("python3 /app/main.py");
    let decision = Decision::Structured(json!({"kind": "list_files"}));

    let first = parse_decision(&decision, &defaults).unwrap();
    let second = parse_decision(&decision, &defaults).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, Action::ListFiles { path: ".".to_string() });
}

/// Test that only verifying actions reach the goal
#[test]
fn test_reached_goal_requires_verifying_action() {
    let read = ActionResult {
        action: Action::read_file("/app/main.py").unwrap(),
        stdout: "print('SUCCESS')".to_string(),
        exit_code: 0,
        succeeded: true,
        duration_ms: 1.0,
    };
    assert!(!read.reached_goal());

    let test = ActionResult {
        action: Action::run_test("python3 /app/main.py").unwrap(),
        ..read.clone()
    };
    assert!(test.reached_goal());
}

/// Test that a report round-trips through JSON with its history
#[test]
fn test_report_json() {
    let mut history = History::new();
    history.append(HistoryEntry::new(
        1,
        ActionResult {
            action: Action::run_test("python3 /app/main.py").unwrap(),
            stdout: "FAIL: Expected 20, got 8\n".to_string(),
            exit_code: 1,
            succeeded: false,
            duration_ms: 3.0,
        },
    ));

    let report = RunReport {
        trace_id: "0190-trace".to_string(),
        goal: "Fix the failing test in /app/main.py.".to_string(),
        model: "qwen2.5-coder:7b".to_string(),
        outcome: RunOutcome::Exhausted { steps_used: 1 },
        history: history.into_entries(),
        decision_failures: 2,
        duration_ms: 10.0,
        teardown_error: None,
    };

    let json = serde_json::to_string(&report).unwrap();
    let parsed: RunReport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.outcome, report.outcome);
    assert_eq!(parsed.history[0].action.kind(), "run_test");
    assert_eq!(parsed.decision_failures, 2);
    assert!(parsed.teardown_error.is_none());
    assert!(!json.contains("teardown_error"));
}

/// Full run against a local Ollama and Docker daemon
///
/// Run with: cargo test -- --ignored test_agent_repairs_cart
#[tokio::test]
#[ignore = "Requires Ollama and a Docker daemon running"]
async fn test_agent_repairs_cart() {
    use std::sync::Arc;

    use sandfix::{AgentController, DockerRuntime, OllamaClient};

    let config = Config::default();
    let backend = Arc::new(OllamaClient::from_config(&config.backend).unwrap());
    let runtime = Arc::new(DockerRuntime::new(&config.sandbox.docker_socket));
    let controller = AgentController::from_config(&config, backend, runtime).unwrap();

    let report = controller.run().await;
    println!("{}", report.summary());
    assert!(!matches!(report.outcome, RunOutcome::Fatal { .. }));
}

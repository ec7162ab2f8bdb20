//! Agent Controller - the bounded repair loop
//!
//! The AgentController owns one sandbox and one history buffer per run and
//! drives them through decide → validate → dispatch → observe until the
//! task's test passes, the step budget runs out, or the backend keeps
//! producing output that cannot be acted on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::metrics::{AGENT_ACTIONS, AGENT_RUNS, AGENT_STEPS, DECISION_FAILURES, LLM_CALL_TIME};

use super::history::{History, HistoryEntry};
use super::report::{RunOutcome, RunReport};
use crate::config::{Config, ConfigError};
use crate::protocol::{parse_decision, ActionDefaults, Decision, DispatchError, Dispatcher};
use crate::reasoning::{DecisionMode, DecodingConfig, ReasoningAdapter, ReasoningBackend};
use crate::sandbox::{ContainerRuntime, Sandbox, SandboxSpec};
use crate::task::TaskSpec;

/// Terminal reason once consecutive failures use up the retry budget
pub const RETRY_BUDGET_REASON: &str = "exceeded malformed-output retry budget";

/// Default upper bound for a single sandbox command
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the agent controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Dispatched steps before the run is declared exhausted
    pub max_steps: usize,
    /// History entries shown to the backend per decision
    pub history_window: usize,
    /// Consecutive failed iterations tolerated before giving up
    pub retry_budget: usize,
    /// Wall-clock limit for the whole run
    pub run_timeout_secs: Option<u64>,
    /// Run the test command after every write
    pub auto_verify: bool,
    /// Per-observation cut-off when rendering history
    pub max_observation_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            history_window: 4,
            retry_budget: 3,
            run_timeout_secs: None,
            auto_verify: true,
            max_observation_chars: 2000,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("max_steps", self.max_steps),
            ("history_window", self.history_window),
            ("retry_budget", self.retry_budget),
            ("max_observation_chars", self.max_observation_chars),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("agent.{} must be at least 1", name)));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("agent.run_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Position of a run in the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Succeeded,
    Exhausted,
    Fatal(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// Loop variables carried from one iteration to the next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    pub state: RunState,
    /// Actions dispatched so far
    pub steps_used: usize,
    /// Failed iterations since the last dispatched action
    pub consecutive_failures: usize,
    /// Failed iterations over the whole run
    pub decision_failures: usize,
    pub last_error: Option<String>,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            state: RunState::Running,
            steps_used: 0,
            consecutive_failures: 0,
            decision_failures: 0,
            last_error: None,
        }
    }

    /// Outcome of a terminal state; `None` while still running
    pub fn outcome(&self) -> Option<RunOutcome> {
        match &self.state {
            RunState::Running => None,
            RunState::Succeeded => Some(RunOutcome::Succeeded {
                steps_used: self.steps_used,
            }),
            RunState::Exhausted => Some(RunOutcome::Exhausted {
                steps_used: self.steps_used,
            }),
            RunState::Fatal(reason) => Some(RunOutcome::Fatal { reason: reason.clone() }),
        }
    }
}

/// Agent Controller orchestrating the reasoning backend and the sandbox
pub struct AgentController {
    adapter: ReasoningAdapter,
    runtime: Arc<dyn ContainerRuntime>,
    dispatcher: Dispatcher,
    defaults: ActionDefaults,
    task: TaskSpec,
    sandbox_spec: SandboxSpec,
    exec_timeout: Duration,
    config: AgentConfig,
}

impl AgentController {
    /// Create a new agent controller
    ///
    /// # Arguments
    /// * `backend` - Reasoning backend that proposes actions
    /// * `runtime` - Isolation backend the sandbox is created on
    /// * `task` - Seed files, test command and success marker
    /// * `sandbox_spec` - Image and keep-alive command for the sandbox
    /// * `config` - Step, window and retry budgets
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        runtime: Arc<dyn ContainerRuntime>,
        task: TaskSpec,
        sandbox_spec: SandboxSpec,
        config: AgentConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        task.validate().map_err(ConfigError::Invalid)?;

        let adapter = ReasoningAdapter::new(backend, &task.goal, &sandbox_spec.workdir)
            .with_max_observation_chars(config.max_observation_chars);

        Ok(Self {
            adapter,
            runtime,
            dispatcher: task.dispatcher(config.auto_verify),
            defaults: task.action_defaults(),
            task,
            sandbox_spec,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            config,
        })
    }

    /// Build a controller from the layered configuration
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn ReasoningBackend>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, ConfigError> {
        let controller = Self::new(
            backend,
            runtime,
            config.task.clone(),
            config.sandbox.spec(),
            config.agent.clone(),
        )?;
        Ok(controller
            .with_mode(config.backend.mode)
            .with_decoding(config.backend.decoding())
            .with_exec_timeout(config.sandbox.exec_timeout()))
    }

    pub fn with_mode(mut self, mode: DecisionMode) -> Self {
        self.adapter = self.adapter.with_mode(mode);
        self
    }

    pub fn with_decoding(mut self, decoding: DecodingConfig) -> Self {
        self.adapter = self.adapter.with_decoding(decoding);
        self
    }

    pub fn with_exec_timeout(mut self, exec_timeout: Duration) -> Self {
        self.exec_timeout = exec_timeout;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn task(&self) -> &TaskSpec {
        &self.task
    }

    /// Run one iteration of the loop
    ///
    /// Either dispatches exactly one action and appends it to `history`, or
    /// counts a failed iteration without touching the sandbox or history.
    /// Does nothing once `state` is terminal.
    pub async fn advance(&self, sandbox: &Sandbox, history: &mut History, state: &mut LoopState) {
        if state.state.is_terminal() {
            return;
        }

        let window = history.recent_window(self.config.history_window);
        let call_start = Instant::now();
        let decision = self
            .adapter
            .decide(window)
            .instrument(info_span!("llm_call", model = %self.adapter.model(), otel.name = "llm_call"))
            .await;
        LLM_CALL_TIME
            .with_label_values(&[self.adapter.model()])
            .observe(call_start.elapsed().as_secs_f64());

        let decision = match decision {
            Ok(Decision::Unparseable { reason, .. }) => return self.record_failure(state, "unparseable", reason),
            Ok(decision) => decision,
            Err(e) => return self.record_failure(state, "backend", e.to_string()),
        };

        let action = match parse_decision(&decision, &self.defaults) {
            Ok(action) => action,
            Err(e) => return self.record_failure(state, "protocol", e.to_string()),
        };

        let step = state.steps_used + 1;
        info!(step, action = %action, "Dispatching action");
        println!("[AGENT] Step {}: {}", step, action.summary());

        let step_span = info_span!("agent_step", step, kind = action.kind(), otel.name = "agent_step");
        let result = match self.dispatcher.dispatch(sandbox, &action).instrument(step_span).await {
            Ok(result) => result,
            Err(DispatchError::Protocol(e)) => return self.record_failure(state, "protocol", e.to_string()),
            Err(DispatchError::Sandbox(e)) => return self.record_failure(state, "execution", e.to_string()),
        };

        let label = if result.succeeded { "ok" } else { "failed" };
        AGENT_ACTIONS.with_label_values(&[action.kind(), label]).inc();
        debug!(step, exit_code = result.exit_code, succeeded = result.succeeded, "Step observed");

        state.steps_used = step;
        state.consecutive_failures = 0;
        state.last_error = None;

        let reached_goal = result.reached_goal();
        history.append(HistoryEntry::new(step, result));

        if reached_goal {
            info!(step, "Success marker observed");
            state.state = RunState::Succeeded;
        } else if state.steps_used >= self.config.max_steps {
            warn!(steps = state.steps_used, "Step budget exhausted");
            state.state = RunState::Exhausted;
        }
    }

    fn record_failure(&self, state: &mut LoopState, stage: &str, error: String) {
        state.consecutive_failures += 1;
        state.decision_failures += 1;
        DECISION_FAILURES.with_label_values(&[stage]).inc();
        warn!(
            stage,
            error = %error,
            consecutive = state.consecutive_failures,
            budget = self.config.retry_budget,
            "Iteration failed before reaching the sandbox"
        );
        println!("[AGENT] ⚠️ {} failure: {}", stage, error);
        state.last_error = Some(error);

        if state.consecutive_failures >= self.config.retry_budget {
            state.state = RunState::Fatal(RETRY_BUDGET_REASON.to_string());
        }
    }

    /// Run the whole task: provision, seed, loop, tear down
    ///
    /// Always returns a report; failures end up in `report.outcome`. The
    /// sandbox is destroyed before this returns, whatever the outcome.
    pub async fn run(&self) -> RunReport {
        let trace_id = Uuid::now_v7().to_string();

        let root_span = info_span!(
            "agent_run",
            trace_id = %trace_id,
            model = %self.adapter.model(),
            runtime = self.runtime.name(),
            otel.name = "agent_run"
        );

        async {
            info!(trace_id = %trace_id, goal = %self.task.goal, "Starting agent run");
            println!("[AGENT] Trace ID: {}", trace_id);

            let start = Instant::now();
            let mut history = History::new();
            let mut state = LoopState::new();
            let spec = self.sandbox_spec.clone().with_trace_id(&trace_id);

            let mut teardown_error = None;
            let outcome = match Sandbox::create(self.runtime.clone(), &spec, self.exec_timeout).await {
                Err(e) => RunOutcome::Fatal { reason: e.to_string() },
                Ok(mut sandbox) => {
                    let outcome = match self.config.run_timeout() {
                        Some(limit) => {
                            match tokio::time::timeout(limit, self.drive(&sandbox, &mut history, &mut state)).await {
                                Ok(outcome) => outcome,
                                Err(_) => {
                                    warn!(timeout_secs = limit.as_secs(), "Run timed out");
                                    RunOutcome::Fatal {
                                        reason: format!("run timed out after {}s", limit.as_secs()),
                                    }
                                }
                            }
                        }
                        None => self.drive(&sandbox, &mut history, &mut state).await,
                    };

                    if let Err(e) = sandbox.destroy().await {
                        warn!(sandbox = %sandbox.id(), error = %e, "Failed to destroy sandbox");
                        println!("[AGENT] Sandbox teardown failed: {}", e);
                        teardown_error = Some(e.to_string());
                    }
                    outcome
                }
            };

            AGENT_RUNS.with_label_values(&[outcome.label()]).inc();
            AGENT_STEPS.observe(state.steps_used as f64);
            info!(trace_id = %trace_id, outcome = %outcome, steps = state.steps_used, "Agent run finished");
            println!("[AGENT] {}", outcome);

            RunReport {
                trace_id: trace_id.clone(),
                goal: self.task.goal.clone(),
                model: self.adapter.model().to_string(),
                outcome,
                history: history.into_entries(),
                decision_failures: state.decision_failures,
                duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                teardown_error,
            }
        }
        .instrument(root_span)
        .await
    }

    async fn drive(&self, sandbox: &Sandbox, history: &mut History, state: &mut LoopState) -> RunOutcome {
        if let Err(reason) = self.seed(sandbox).await {
            state.state = RunState::Fatal(reason);
        }

        while !state.state.is_terminal() {
            self.advance(sandbox, history, state).await;
        }

        state.outcome().unwrap_or_else(|| RunOutcome::Fatal {
            reason: "loop ended without a terminal state".to_string(),
        })
    }

    /// Write the task's files into the sandbox
    async fn seed(&self, sandbox: &Sandbox) -> Result<(), String> {
        for file in &self.task.files {
            sandbox
                .write_file(&file.path, &file.content)
                .await
                .map_err(|e| format!("failed to seed {}: {}", file.path, e))?;
            debug!(path = %file.path, bytes = file.content.len(), "Seeded task file");
        }
        Ok(())
    }
}

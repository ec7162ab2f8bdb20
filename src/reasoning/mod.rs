//! Reasoning adapter
//!
//! Formats the recent history into a request for the reasoning backend and
//! turns the reply into a [`Decision`]. The backend itself is a black box
//! behind [`ReasoningBackend`]; `crate::ollama` provides the real one.
//!
//! Replies that cannot be read at all become `Decision::Unparseable`.
//! Replies that parse but describe a bad action are left for
//! `parse_decision` to reject, so the two cases stay distinguishable.

pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::agent::HistoryEntry;
use crate::protocol::schema::{LEGACY_SCHEMA, STRUCTURED_SCHEMA};
use crate::protocol::{has_legacy_command, Decision};

/// Which dialect the backend is asked to answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    /// One JSON object per reply (JSON mode on the backend)
    #[default]
    Structured,
    /// `COMMAND args` free text
    Legacy,
}

/// Sampling settings sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodingConfig {
    pub temperature: f32,
    pub num_ctx: Option<u32>,
    /// Ask the backend for syntactically valid JSON
    pub json_mode: bool,
    /// Constrain output to this JSON Schema instead of plain JSON mode
    pub schema: Option<Value>,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            num_ctx: Some(4096),
            json_mode: true,
            schema: None,
        }
    }
}

/// Everything the backend is given for one decision
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest {
    /// The task goal
    pub instruction: String,
    /// Description of the permissible actions
    pub schema: String,
    /// Rendered recent history
    pub context: String,
    /// The full prompt assembled from the parts above
    pub prompt: String,
    pub decoding: DecodingConfig,
}

/// Error type for backend calls
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("empty response from backend")]
    EmptyResponse,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A generative backend: request in, raw text out
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Model name, for logs and metric labels
    fn model(&self) -> &str;

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, BackendError>;
}

/// Builds requests from history and interprets replies
pub struct ReasoningAdapter {
    backend: Arc<dyn ReasoningBackend>,
    mode: DecisionMode,
    goal: String,
    workdir: String,
    decoding: DecodingConfig,
    max_observation_chars: usize,
}

impl ReasoningAdapter {
    /// # Arguments
    /// * `backend` - The generative backend to consult
    /// * `goal` - Task statement placed at the top of every prompt
    /// * `workdir` - Working directory inside the sandbox
    pub fn new(backend: Arc<dyn ReasoningBackend>, goal: impl Into<String>, workdir: impl Into<String>) -> Self {
        Self {
            backend,
            mode: DecisionMode::Structured,
            goal: goal.into(),
            workdir: workdir.into(),
            decoding: DecodingConfig::default(),
            max_observation_chars: 2000,
        }
    }

    pub fn with_mode(mut self, mode: DecisionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_decoding(mut self, decoding: DecodingConfig) -> Self {
        self.decoding = decoding;
        self
    }

    pub fn with_max_observation_chars(mut self, max_chars: usize) -> Self {
        self.max_observation_chars = max_chars;
        self
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn mode(&self) -> DecisionMode {
        self.mode
    }

    /// Build the request for the given history window
    pub fn build_request(&self, window: &[HistoryEntry]) -> ReasoningRequest {
        let schema = match self.mode {
            DecisionMode::Structured => STRUCTURED_SCHEMA,
            DecisionMode::Legacy => LEGACY_SCHEMA,
        };
        let context = prompt::render_history(window, self.max_observation_chars);
        let full_prompt = prompt::render_prompt(self.mode, &self.goal, &self.workdir, schema, &context);

        let mut decoding = self.decoding.clone();
        match self.mode {
            DecisionMode::Structured => decoding.json_mode = true,
            DecisionMode::Legacy => {
                decoding.json_mode = false;
                decoding.schema = None;
            }
        }

        ReasoningRequest {
            instruction: self.goal.clone(),
            schema: schema.to_string(),
            context,
            prompt: full_prompt,
            decoding,
        }
    }

    /// Ask the backend for the next decision
    ///
    /// Transport failures are errors; unreadable replies are not.
    pub async fn decide(&self, window: &[HistoryEntry]) -> Result<Decision, BackendError> {
        let request = self.build_request(window);
        let raw = self.backend.complete(&request).await?;
        let decision = interpret(&raw, self.mode);
        debug!(mode = ?self.mode, raw_len = raw.len(), unparseable = decision.is_unparseable(), "Backend replied");
        Ok(decision)
    }
}

/// Interpret a raw backend reply
pub fn interpret(raw: &str, mode: DecisionMode) -> Decision {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Decision::Unparseable {
            raw: raw.to_string(),
            reason: "empty response".to_string(),
        };
    }

    let unfenced = strip_outer_fence(trimmed);
    let parse_error = match serde_json::from_str::<Value>(unfenced) {
        Ok(value @ Value::Object(_)) => return Decision::Structured(value),
        Ok(other) => format!("expected a JSON object, got {}", json_type(&other)),
        Err(e) => e.to_string(),
    };

    if let Some(value) = repair_content_field(unfenced)
        .and_then(|fixed| serde_json::from_str::<Value>(&fixed).ok())
        .filter(Value::is_object)
    {
        return Decision::Structured(value);
    }

    if let Some(value) = find_embedded_decision(trimmed) {
        return Decision::Structured(value);
    }

    // Models asked for JSON still sometimes answer `RUN_TEST`
    match mode {
        DecisionMode::Legacy => Decision::FreeText(raw.to_string()),
        DecisionMode::Structured if has_legacy_command(trimmed) => {
            debug!("Structured reply fell back to the legacy dialect");
            Decision::FreeText(raw.to_string())
        }
        DecisionMode::Structured => Decision::Unparseable {
            raw: raw.to_string(),
            reason: parse_error,
        },
    }
}

/// Remove a single surrounding Markdown code fence, if present
fn strip_outer_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body_start) = rest.find('\n') else {
        return text;
    };
    let body = &rest[body_start + 1..];
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Find the first balanced `{...}` in `text` that parses and names an action
fn find_embedded_decision(text: &str) -> Option<Value> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        let candidate = &text[s..=i];
                        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                            if value.get("kind").is_some() || value.get("action").is_some() {
                                return Some(value);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Fix the most common JSON-mode failure: raw quotes or newlines inside `content`
///
/// Assumes `content` is the last field, which is how models write it.
fn repair_content_field(json_str: &str) -> Option<String> {
    const KEY: &str = "\"content\"";
    let key_pos = json_str.find(KEY)?;
    let after_key = &json_str[key_pos + KEY.len()..];
    let colon = after_key.find(':')?;
    if !after_key[..colon].trim().is_empty() {
        return None;
    }
    let after_colon = &after_key[colon + 1..];
    let quote = after_colon.find('"')?;
    if !after_colon[..quote].trim().is_empty() {
        return None;
    }

    let value_start = key_pos + KEY.len() + colon + 1 + quote + 1;
    let remaining = &json_str[value_start..];
    let end = remaining.trim_end().strip_suffix('}')?.trim_end().strip_suffix('"')?.len();
    let value = &remaining[..end];

    let escaped = value
        .replace("\\\"", "\u{FFFF}")
        .replace('"', "\\\"")
        .replace('\u{FFFF}', "\\\"")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
        .replace('\t', "\\t");

    Some(format!("{}{}{}", &json_str[..value_start], escaped, &remaining[end..]))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_plain_json() {
        let d = interpret(r#"{"kind": "run_test"}"#, DecisionMode::Structured);
        assert_eq!(d, Decision::Structured(serde_json::json!({"kind": "run_test"})));
    }

    #[test]
    fn test_interpret_fenced_json() {
        let raw = "```json\n{\"kind\": \"read_file\", \"path\": \"/app/utils.py\"}\n```";
        match interpret(raw, DecisionMode::Structured) {
            Decision::Structured(v) => assert_eq!(v["path"], "/app/utils.py"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_interpret_json_inside_prose() {
        let raw = "Let me check the helper first: {\"kind\": \"read_file\", \"path\": \"utils.py\"} then I'll fix it.";
        match interpret(raw, DecisionMode::Structured) {
            Decision::Structured(v) => assert_eq!(v["kind"], "read_file"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_interpret_braces_inside_strings() {
        let raw = r#"Plan: {"kind": "write_file", "path": "a.py", "content": "d = {'k': 1}\n"}"#;
        match interpret(raw, DecisionMode::Structured) {
            Decision::Structured(v) => assert_eq!(v["content"], "d = {'k': 1}\n"),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_repairs_unescaped_content() {
        let raw = "{\"kind\": \"write_file\", \"path\": \"/app/utils.py\", \"content\": \"def f():\n    return \"ok\"\n\"}";
        match interpret(raw, DecisionMode::Structured) {
            Decision::Structured(v) => {
                assert_eq!(v["content"], "def f():\n    return \"ok\"\n");
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_object_without_kind_is_structured_not_unparseable() {
        let d = interpret(r#"{"path": "/app"}"#, DecisionMode::Structured);
        assert!(matches!(d, Decision::Structured(_)));
    }

    #[test]
    fn test_garbage_is_unparseable_in_structured_mode() {
        assert!(interpret("I think the bug is in utils.py", DecisionMode::Structured).is_unparseable());
        assert!(interpret("   ", DecisionMode::Structured).is_unparseable());
        assert!(interpret("[1, 2]", DecisionMode::Structured).is_unparseable());
        assert!(interpret("please RUN_TEST now", DecisionMode::Structured).is_unparseable());
    }

    #[test]
    fn test_structured_mode_accepts_legacy_command() {
        let d = interpret("RUN_TEST", DecisionMode::Structured);
        assert_eq!(d, Decision::FreeText("RUN_TEST".to_string()));

        let reply = "I will check the helper first.\nREAD_FILE /app/utils.py\n";
        assert_eq!(interpret(reply, DecisionMode::Structured), Decision::FreeText(reply.to_string()));
    }

    #[test]
    fn test_legacy_mode_keeps_free_text() {
        let d = interpret("READ_FILE src/utils.py", DecisionMode::Legacy);
        assert_eq!(d, Decision::FreeText("READ_FILE src/utils.py".to_string()));
        assert!(interpret("", DecisionMode::Legacy).is_unparseable());
    }
}

//! Prompt rendering for the reasoning backend

use serde_json::json;

use super::DecisionMode;
use crate::agent::HistoryEntry;

/// Rendered when the agent has not acted yet
pub const EMPTY_HISTORY_NOTE: &str = "No actions yet. The environment has just started and the tests are failing.";

/// Render the recent window as a JSON array the model can read
///
/// Observations and written content are cut to `max_chars` each.
pub fn render_history(window: &[HistoryEntry], max_chars: usize) -> String {
    if window.is_empty() {
        return EMPTY_HISTORY_NOTE.to_string();
    }

    let steps: Vec<serde_json::Value> = window
        .iter()
        .map(|entry| {
            let mut step = json!({
                "step": entry.step,
                "kind": entry.action.kind(),
            });
            if let Some(path) = entry.action.path() {
                step["path"] = json!(path);
            }
            if let crate::protocol::Action::WriteFile { content, .. } = &entry.action {
                step["content"] = json!(truncate(content, max_chars));
            }
            step["exit_code"] = json!(entry.result.exit_code);
            step["succeeded"] = json!(entry.result.succeeded);
            step["output"] = json!(truncate(&entry.result.stdout, max_chars));
            step
        })
        .collect();

    serde_json::to_string_pretty(&steps).unwrap_or_else(|_| EMPTY_HISTORY_NOTE.to_string())
}

/// Assemble the full prompt text
pub fn render_prompt(mode: DecisionMode, goal: &str, workdir: &str, schema: &str, history: &str) -> String {
    match mode {
        DecisionMode::Structured => format!(
            r#"You are a robotic software engineer. You interact with a file system via JSON commands.

GOAL: {goal}
CURRENT WORKING DIR: {workdir}

{schema}

HISTORY:
{history}

INSTRUCTIONS:
- Analyze the history. Determine the next logical step.
- The bug is likely in a dependency, not the test file itself.
- Writing a file re-runs the tests automatically.
- RETURN ONLY JSON. NO TEXT. NO MARKDOWN."#
        ),
        DecisionMode::Legacy => format!(
            r#"You are an autonomous developer debugging a repository.

TASK: {goal}
CURRENT WORKING DIR: {workdir}

CURRENT CONTEXT:
{history}

{schema}

INSTRUCTIONS:
- You cannot see the whole codebase at once. You must explore.
- If you see an import error or logic error, read the imported file.

What is your next move?"#
        ),
    }
}

/// Cut `text` to at most `max_chars` characters, marking what was dropped
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            format!("{}\n...[truncated {} chars]", &text[..cut], dropped)
        }
    }
}

//! Decision validation
//!
//! A `Decision` is whatever the reasoning adapter got back from the backend,
//! before anyone trusted it. `parse_decision` is the only way from a
//! decision to an [`Action`]. Structured mappings are the primary form; the
//! legacy `COMMAND args` free text is normalized into the same variants.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Action, ProtocolError};

/// Raw output of the reasoning adapter, not yet validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    /// A JSON mapping with a `kind` (or `action`) discriminator
    Structured(Value),
    /// Free text in the legacy `COMMAND args` dialect
    FreeText(String),
    /// The backend's reply could not be interpreted at all
    Unparseable { raw: String, reason: String },
}

impl Decision {
    pub fn is_unparseable(&self) -> bool {
        matches!(self, Decision::Unparseable { .. })
    }
}

/// Values filled in when a decision leaves an optional field out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDefaults {
    /// The task's test command
    pub test_command: String,
    /// Accept `cmd` from the agent instead of always running `test_command`
    pub allow_agent_test_command: bool,
    /// Directory listed when `list_files` has no path
    pub list_path: String,
}

impl ActionDefaults {
    pub fn new(test_command: impl Into<String>) -> Self {
        Self {
            test_command: test_command.into(),
            allow_agent_test_command: false,
            list_path: ".".to_string(),
        }
    }
}

/// Turn a decision into a validated action
///
/// Pure: the same decision and defaults always give the same result.
pub fn parse_decision(decision: &Decision, defaults: &ActionDefaults) -> Result<Action, ProtocolError> {
    match decision {
        Decision::Structured(value) => parse_structured(value, defaults),
        Decision::FreeText(text) => parse_legacy(text, defaults),
        Decision::Unparseable { reason, .. } => Err(ProtocolError::MalformedInput(format!(
            "unparseable decision: {}",
            reason
        ))),
    }
}

fn parse_structured(value: &Value, defaults: &ActionDefaults) -> Result<Action, ProtocolError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("decision is not a JSON object"))?;

    let kind = match obj.get("kind").or_else(|| obj.get("action")) {
        Some(Value::String(k)) => k.trim().to_ascii_lowercase(),
        Some(_) => return Err(malformed("`kind` must be a string")),
        None => return Err(malformed("missing `kind`")),
    };

    let action = match kind.as_str() {
        "list_files" => Action::ListFiles {
            path: optional_str(obj, "path")?.unwrap_or_else(|| defaults.list_path.clone()),
        },
        "read_file" => Action::ReadFile {
            path: required_str(obj, "path")?,
        },
        "write_file" => Action::WriteFile {
            path: required_str(obj, "path")?,
            content: required_str(obj, "content")?,
        },
        "run_test" => Action::RunTest {
            command: test_command(optional_str(obj, "cmd")?, defaults),
        },
        "" => return Err(malformed("empty `kind`")),
        other => return Err(malformed(&format!("unknown kind `{}`", other))),
    };

    action.validate()?;
    Ok(action)
}

fn required_str(obj: &Map<String, Value>, field: &str) -> Result<String, ProtocolError> {
    optional_str(obj, field)?.ok_or_else(|| malformed(&format!("missing required field `{}`", field)))
}

fn optional_str(obj: &Map<String, Value>, field: &str) -> Result<Option<String>, ProtocolError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(malformed(&format!("field `{}` must be a string", field))),
    }
}

fn test_command(requested: Option<String>, defaults: &ActionDefaults) -> String {
    match requested {
        Some(cmd) if defaults.allow_agent_test_command => cmd,
        _ => defaults.test_command.clone(),
    }
}

lazy_static! {
    static ref LEGACY_COMMAND: Regex =
        Regex::new(r"(?m)^[ \t]*(LIST_FILES|READ_FILE|WRITE_FILE|RUN_TEST)\b[ \t]*([^\r\n]*)").unwrap();
}

/// True when some line of `text` starts with a legacy command name
pub fn has_legacy_command(text: &str) -> bool {
    LEGACY_COMMAND.is_match(text)
}

/// Parse the legacy dialect: the first line starting with a command name wins
///
/// ```text
/// LIST_FILES src/
/// READ_FILE src/utils.py
/// WRITE_FILE src/utils.py
/// <file content, optionally fenced>
/// RUN_TEST
/// ```
fn parse_legacy(text: &str, defaults: &ActionDefaults) -> Result<Action, ProtocolError> {
    let caps = LEGACY_COMMAND
        .captures(text)
        .ok_or_else(|| malformed("no recognised command at the start of a line"))?;
    let (Some(command), Some(args), Some(line)) = (caps.get(1), caps.get(2), caps.get(0)) else {
        return Err(malformed("no recognised command at the start of a line"));
    };
    let first_arg = args.as_str().split_whitespace().next().map(str::to_string);

    let action = match command.as_str() {
        "LIST_FILES" => Action::ListFiles {
            path: first_arg.unwrap_or_else(|| defaults.list_path.clone()),
        },
        "READ_FILE" => Action::ReadFile {
            path: first_arg.ok_or_else(|| malformed("READ_FILE needs a path"))?,
        },
        "WRITE_FILE" => {
            let path = first_arg.ok_or_else(|| malformed("WRITE_FILE needs a path"))?;
            Action::WriteFile {
                path,
                content: strip_code_fences(&text[line.end()..]),
            }
        }
        "RUN_TEST" => Action::RunTest {
            command: test_command(None, defaults),
        },
        other => return Err(malformed(&format!("unknown command `{}`", other))),
    };

    action.validate()?;
    Ok(action)
}

/// Drop Markdown fence lines and surrounding blank lines, keep indentation
pub fn strip_code_fences(body: &str) -> String {
    let kept: Vec<&str> = body
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    let joined = kept.join("\n");
    let trimmed = joined.trim_matches(|c| c == '\n' || c == '\r');
    if trimmed.trim().is_empty() {
        return String::new();
    }
    format!("{}\n", trimmed.trim_end())
}

fn malformed(reason: &str) -> ProtocolError {
    ProtocolError::MalformedInput(reason.to_string())
}

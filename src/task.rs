//! Repair task definition
//!
//! A task is the broken project seeded into the sandbox, the command that
//! tests it, and the literal the test prints when it passes.

use serde::{Deserialize, Serialize};

use crate::protocol::{ActionDefaults, Dispatcher};

const CART_MAIN: &str = r#"from utils import calculate_price

if __name__ == "__main__":
    total = calculate_price(10, 2)
    if total != 20:
        print(f"FAIL: Expected 20, got {total}")
        exit(1)
    print("SUCCESS: Cart total is correct.")
"#;

const CART_UTILS: &str = r#"def calculate_price(price, quantity):
    return price - quantity  # BUG
"#;

/// A file written into the sandbox before the first step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFile {
    pub path: String,
    pub content: String,
}

impl SeedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// What the agent is asked to fix and how success is judged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    /// Goal statement shown to the reasoning backend
    pub goal: String,
    /// Command that runs the test suite inside the sandbox
    pub test_command: String,
    /// Literal the test prints on its success path
    pub success_marker: String,
    /// Let the agent pick its own test command in `run_test`
    pub allow_agent_test_command: bool,
    /// Project files seeded before the loop starts
    pub files: Vec<SeedFile>,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self::shopping_cart()
    }
}

impl TaskSpec {
    pub fn new(goal: impl Into<String>, test_command: impl Into<String>, success_marker: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            test_command: test_command.into(),
            success_marker: success_marker.into(),
            allow_agent_test_command: false,
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.push(SeedFile::new(path, content));
        self
    }

    /// The two-file cart project whose price helper subtracts instead of multiplying
    pub fn shopping_cart() -> Self {
        Self::new("Fix the failing test in /app/main.py.", "python3 /app/main.py", "SUCCESS")
            .with_file("/app/main.py", CART_MAIN)
            .with_file("/app/utils.py", CART_UTILS)
    }

    /// Defaults applied while validating decisions for this task
    pub fn action_defaults(&self) -> ActionDefaults {
        ActionDefaults {
            allow_agent_test_command: self.allow_agent_test_command,
            ..ActionDefaults::new(&self.test_command)
        }
    }

    /// Dispatcher judging actions against this task's test
    pub fn dispatcher(&self, auto_verify: bool) -> Dispatcher {
        Dispatcher::new(&self.test_command, &self.success_marker).with_auto_verify(auto_verify)
    }

    /// Check the fields a run cannot do without
    pub fn validate(&self) -> Result<(), String> {
        if self.goal.trim().is_empty() {
            return Err("task goal must not be empty".to_string());
        }
        if self.test_command.trim().is_empty() {
            return Err("task test_command must not be empty".to_string());
        }
        if self.success_marker.is_empty() {
            return Err("task success_marker must not be empty".to_string());
        }
        if let Some(file) = self.files.iter().find(|f| f.path.trim().is_empty()) {
            return Err(format!("seed file with empty path ({} bytes)", file.content.len()));
        }
        Ok(())
    }
}

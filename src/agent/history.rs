//! History buffer - chronological record of what the agent did
//!
//! The buffer keeps everything for the run report, but each reasoning call
//! only sees the last `n` entries.

use serde::{Deserialize, Serialize};

use crate::protocol::{Action, ActionResult};

/// One dispatched step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 1-based step number
    pub step: usize,
    pub action: Action,
    pub result: ActionResult,
}

impl HistoryEntry {
    pub fn new(step: usize, result: ActionResult) -> Self {
        Self {
            step,
            action: result.action.clone(),
            result,
        }
    }
}

/// Append-only, ordered record of past steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry at the end
    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// The last `n` entries, oldest first
    pub fn recent_window(&self, n: usize) -> &[HistoryEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: usize) -> HistoryEntry {
        HistoryEntry::new(
            step,
            ActionResult {
                action: Action::list_files(format!("dir{}", step)).unwrap(),
                stdout: String::new(),
                exit_code: 0,
                succeeded: true,
                duration_ms: 0.0,
            },
        )
    }

    #[test]
    fn test_window_keeps_order() {
        let mut history = History::new();
        for step in 1..=6 {
            history.append(entry(step));
        }
        let window: Vec<usize> = history.recent_window(4).iter().map(|e| e.step).collect();
        assert_eq!(window, vec![3, 4, 5, 6]);
        assert_eq!(history.len(), 6);
    }

    #[test]
    fn test_window_larger_than_history() {
        let mut history = History::new();
        assert!(history.recent_window(3).is_empty());
        history.append(entry(1));
        assert_eq!(history.recent_window(3).len(), 1);
        assert!(history.recent_window(0).is_empty());
    }

    #[test]
    fn test_entry_mirrors_result_action() {
        let e = entry(2);
        assert_eq!(e.action, e.result.action);
    }
}

//! Per-task oscillation detection.
//!
//! A task is "stuck" when consecutive retries keep producing the exact
//! same set of file changes — the agent is rewriting the same thing
//! without making progress. The detector keeps a small ring buffer of
//! recent `(iteration, fingerprint)` pairs per task and forces a FAIL once
//! the last three are pairwise identical, overriding the iteration budget.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::mission::types::FileRecord;

const WINDOW: usize = 3;

pub fn fingerprint(file_changes: &[FileRecord]) -> String {
    let mut sorted: Vec<&FileRecord> = file_changes.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for record in sorted {
        hasher.update(record.path.as_bytes());
        hasher.update([0u8]);
        hasher.update([record.action as u8]);
        hasher.update(record.lines_changed.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct Entry {
    iteration: u32,
    fingerprint: String,
}

/// Tracks a ring buffer of the last [`WINDOW`] fingerprints per task.
#[derive(Debug, Default)]
pub struct OscillationDetector {
    history: HashMap<String, Vec<Entry>>,
}

impl OscillationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed file-change set for a task's iteration, and
    /// report whether the task is now oscillating.
    pub fn record(&mut self, task_id: &str, iteration: u32, file_changes: &[FileRecord]) -> bool {
        let fp = fingerprint(file_changes);
        let entries = self.history.entry(task_id.to_string()).or_default();
        entries.push(Entry {
            iteration,
            fingerprint: fp,
        });
        if entries.len() > WINDOW {
            entries.remove(0);
        }

        entries.len() == WINDOW && entries.windows(2).all(|w| w[0].fingerprint == w[1].fingerprint)
    }

    pub fn clear(&mut self, task_id: &str) {
        self.history.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::types::FileAction;

    fn changes(path: &str, lines: u32) -> Vec<FileRecord> {
        vec![FileRecord {
            path: path.to_string(),
            action: FileAction::Modified,
            lines_changed: lines,
        }]
    }

    #[test]
    fn three_identical_in_a_row_triggers_oscillation() {
        let mut detector = OscillationDetector::new();
        assert!(!detector.record("TASK-001", 1, &changes("src/x.rs", 10)));
        assert!(!detector.record("TASK-001", 2, &changes("src/x.rs", 10)));
        assert!(detector.record("TASK-001", 3, &changes("src/x.rs", 10)));
    }

    #[test]
    fn differing_changes_reset_the_window() {
        let mut detector = OscillationDetector::new();
        assert!(!detector.record("TASK-001", 1, &changes("src/x.rs", 10)));
        assert!(!detector.record("TASK-001", 2, &changes("src/x.rs", 10)));
        assert!(!detector.record("TASK-001", 3, &changes("src/y.rs", 5)));
        assert!(!detector.record("TASK-001", 4, &changes("src/y.rs", 5)));
    }

    #[test]
    fn fingerprint_ignores_input_order() {
        let a = vec![
            FileRecord { path: "a.rs".into(), action: FileAction::Created, lines_changed: 1 },
            FileRecord { path: "b.rs".into(), action: FileAction::Created, lines_changed: 2 },
        ];
        let b = vec![
            FileRecord { path: "b.rs".into(), action: FileAction::Created, lines_changed: 2 },
            FileRecord { path: "a.rs".into(), action: FileAction::Created, lines_changed: 1 },
        ];
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_tasks_tracked_independently() {
        let mut detector = OscillationDetector::new();
        detector.record("TASK-001", 1, &changes("a.rs", 1));
        detector.record("TASK-001", 2, &changes("a.rs", 1));
        assert!(detector.record("TASK-001", 3, &changes("a.rs", 1)));

        assert!(!detector.record("TASK-002", 1, &changes("a.rs", 1)));
    }

    #[test]
    fn clear_resets_history() {
        let mut detector = OscillationDetector::new();
        detector.record("TASK-001", 1, &changes("a.rs", 1));
        detector.record("TASK-001", 2, &changes("a.rs", 1));
        detector.clear("TASK-001");
        assert!(!detector.record("TASK-001", 3, &changes("a.rs", 1)));
    }
}

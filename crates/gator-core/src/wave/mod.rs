//! The wave scheduler.
//!
//! `schedule_next_wave` is a pure function of `(tasks, completed_task_ids,
//! strategy, max_parallel)` (testable property I5) — it performs no I/O and
//! holds no state across calls. It is deliberately distinct from
//! `gator_db::queries::tasks::ready_task_ids`, which is a convenience SQL
//! query for dashboards, not the scheduler's source of truth.

use std::collections::BTreeSet;

use crate::mission::types::{ExecutionStrategy, Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaveResult {
    pub admitted: Vec<String>,
    /// Candidates that were runnable but deferred by the file-overlap rule.
    pub deferred: Vec<String>,
}

/// Candidates are tasks with `status=PENDING` whose dependencies are a
/// subset of `completed_task_ids`, and whose dependencies did not
/// transitively end FAILED (those propagate to SKIPPED elsewhere and are
/// never PENDING by the time this runs).
fn candidates<'a>(tasks: &'a [Task], completed_task_ids: &[String]) -> Vec<&'a Task> {
    let mut result: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter(|t| t.dependencies.iter().all(|d| completed_task_ids.contains(d)))
        .collect();
    result.sort_by(|a, b| a.id.cmp(&b.id));
    result
}

pub fn schedule_next_wave(
    tasks: &[Task],
    completed_task_ids: &[String],
    strategy: ExecutionStrategy,
    max_parallel: u32,
) -> WaveResult {
    let ranked = candidates(tasks, completed_task_ids);

    match strategy {
        ExecutionStrategy::Sequential => {
            let admitted = ranked.first().map(|t| t.id.clone()).into_iter().collect();
            WaveResult {
                admitted,
                deferred: Vec::new(),
            }
        }
        ExecutionStrategy::Parallel => {
            let mut admitted = Vec::new();
            let mut deferred = Vec::new();
            let mut claimed_files: BTreeSet<&str> = BTreeSet::new();

            for task in ranked {
                if admitted.len() as u32 >= max_parallel {
                    deferred.push(task.id.clone());
                    continue;
                }

                let overlaps = task
                    .target_files
                    .iter()
                    .any(|f| claimed_files.contains(f.as_str()));

                if overlaps {
                    deferred.push(task.id.clone());
                    continue;
                }

                claimed_files.extend(task.target_files.iter().map(|f| f.as_str()));
                admitted.push(task.id.clone());
            }

            WaveResult { admitted, deferred }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::types::{AgentRole, OnFailure};

    fn task(id: &str, deps: &[&str], target_files: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            agent: AgentRole::Coder,
            description: String::new(),
            input_context: String::new(),
            success_criteria: String::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            status: TaskStatus::Pending,
            iteration: 0,
            max_iterations: 3,
            on_failure: OnFailure::Retry,
            target_files: target_files.iter().map(|s| s.to_string()).collect(),
            files_affected: Vec::new(),
            elapsed_ms: None,
        }
    }

    #[test]
    fn sequential_admits_lowest_id_only() {
        let tasks = vec![task("TASK-002", &[], &[]), task("TASK-001", &[], &[])];
        let result = schedule_next_wave(&tasks, &Vec::new(), ExecutionStrategy::Sequential, 1);
        assert_eq!(result.admitted, vec!["TASK-001".to_string()]);
        assert!(result.deferred.is_empty());
    }

    #[test]
    fn parallel_admits_up_to_max_parallel() {
        let tasks = vec![
            task("TASK-001", &[], &["a.rs"]),
            task("TASK-002", &[], &["b.rs"]),
            task("TASK-003", &[], &["c.rs"]),
        ];
        let result = schedule_next_wave(&tasks, &Vec::new(), ExecutionStrategy::Parallel, 2);
        assert_eq!(result.admitted, vec!["TASK-001".to_string(), "TASK-002".to_string()]);
        assert_eq!(result.deferred, vec!["TASK-003".to_string()]);
    }

    #[test]
    fn file_overlap_defers_conflicting_candidate() {
        // Scenario 2 from the spec's end-to-end examples.
        let tasks = vec![
            task("TASK-001", &[], &["pom.xml"]),
            task("TASK-002", &[], &["pom.xml"]),
        ];
        let result = schedule_next_wave(&tasks, &Vec::new(), ExecutionStrategy::Parallel, 2);
        assert_eq!(result.admitted, vec!["TASK-001".to_string()]);
        assert_eq!(result.deferred, vec!["TASK-002".to_string()]);
    }

    #[test]
    fn respects_dependency_gating() {
        let tasks = vec![task("TASK-002", &["TASK-001"], &[]), task("TASK-001", &[], &[])];
        let result = schedule_next_wave(&tasks, &Vec::new(), ExecutionStrategy::Sequential, 1);
        assert_eq!(result.admitted, vec!["TASK-001".to_string()]);
    }

    #[test]
    fn excludes_non_pending_tasks() {
        let mut tasks = vec![task("TASK-001", &[], &[])];
        tasks[0].status = TaskStatus::Passed;
        let result = schedule_next_wave(&tasks, &Vec::new(), ExecutionStrategy::Sequential, 1);
        assert!(result.admitted.is_empty());
    }

    #[test]
    fn is_pure_function_of_inputs() {
        // I5: identical inputs always produce identical output.
        let tasks = vec![
            task("TASK-003", &[], &["c.rs"]),
            task("TASK-001", &[], &["a.rs"]),
            task("TASK-002", &[], &["b.rs"]),
        ];
        let completed: Vec<String> = Vec::new();
        let r1 = schedule_next_wave(&tasks, &completed, ExecutionStrategy::Parallel, 3);
        let r2 = schedule_next_wave(&tasks, &completed, ExecutionStrategy::Parallel, 3);
        assert_eq!(r1, r2);
    }

    #[test]
    fn deterministic_admission_order_matches_lexicographic_id() {
        let tasks = vec![
            task("TASK-003", &[], &[]),
            task("TASK-001", &[], &[]),
            task("TASK-002", &[], &[]),
        ];
        let result = schedule_next_wave(&tasks, &Vec::new(), ExecutionStrategy::Parallel, 10);
        assert_eq!(
            result.admitted,
            vec!["TASK-001".to_string(), "TASK-002".to_string(), "TASK-003".to_string()]
        );
    }
}

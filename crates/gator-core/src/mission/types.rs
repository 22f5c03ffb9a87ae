//! The immutable value types that make up a mission's state.
//!
//! [`MissionState`] is the single channel through which every node of the
//! engine communicates: each transition takes one `MissionState` and
//! produces a new one. Nothing here is ever mutated in place once built;
//! the engine clones-and-replaces via builder-style helper methods.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use gator_db::models::{AgentRole, ExecutionStrategy, InteractionMode, MissionStatus, OnFailure, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAction {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub action: FileAction,
    pub lines_changed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub task_id: String,
    pub passed: bool,
    pub total_tests: u32,
    pub failed_tests: u32,
    pub summary: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub task_id: String,
    pub approved: bool,
    pub summary: String,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveDispatchResult {
    pub task_id: String,
    pub status_from_dispatch: TaskStatus,
    pub file_changes: Vec<FileRecord>,
    pub output: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent: AgentRole,
    pub description: String,
    pub input_context: String,
    pub success_criteria: String,
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub on_failure: OnFailure,
    pub target_files: Vec<String>,
    pub files_affected: Vec<FileRecord>,
    pub elapsed_ms: Option<u64>,
}

impl Task {
    /// RESEARCHER/TESTER/REVIEWER run against an existing branch (or none)
    /// and never produce a branch of their own (invariant 6).
    pub fn produces_branch(&self) -> bool {
        self.agent.produces_branch()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub language: Option<String>,
    pub framework: Option<String>,
    pub file_tree: Vec<String>,
    pub manifest_created_by_task: bool,
}

impl Default for ProjectContext {
    fn default() -> Self {
        Self {
            language: None,
            framework: None,
            file_tree: Vec::new(),
            manifest_created_by_task: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    pub question_id: String,
    pub question: String,
}

/// The single value every node of the engine takes in and hands back out,
/// replaced rather than mutated at every transition (invariant 7: every
/// mutation produces a new Checkpoint keyed by the mission id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionState {
    pub mission_id: String,
    pub request: String,
    pub interaction_mode: InteractionMode,
    pub status: MissionStatus,

    pub classification: Option<Classification>,
    pub project_context: Option<ProjectContext>,
    pub product_spec: Option<String>,
    pub clarifying_questions: Vec<ClarifyingQuestion>,
    pub clarifying_answers: Option<String>,

    pub tasks: Vec<Task>,
    /// Insertion order preserved for stable display (invariant 1).
    pub completed_task_ids: Vec<String>,
    pub wave_task_ids: BTreeSet<String>,
    pub wave_count: u32,
    pub execution_strategy: ExecutionStrategy,

    pub test_results: Vec<TestResult>,
    pub review_feedback: Vec<ReviewFeedback>,

    pub quality_gate_granted: bool,
    pub deployment_url: Option<String>,
    pub errors: Vec<String>,
    pub project_path: Option<String>,
    pub git_remote_url: Option<String>,

    pub create_deployment_task: bool,
    pub skip_per_task_tests: bool,
    pub max_parallel: u32,
}

impl MissionState {
    pub fn new(mission_id: impl Into<String>, request: impl Into<String>, interaction_mode: InteractionMode) -> Self {
        Self {
            mission_id: mission_id.into(),
            request: request.into(),
            interaction_mode,
            status: MissionStatus::Classifying,
            classification: None,
            project_context: None,
            product_spec: None,
            clarifying_questions: Vec::new(),
            clarifying_answers: None,
            tasks: Vec::new(),
            completed_task_ids: Vec::new(),
            wave_task_ids: BTreeSet::new(),
            wave_count: 0,
            execution_strategy: ExecutionStrategy::Sequential,
            test_results: Vec::new(),
            review_feedback: Vec::new(),
            quality_gate_granted: false,
            deployment_url: None,
            errors: Vec::new(),
            project_path: None,
            git_remote_url: None,
            create_deployment_task: false,
            skip_per_task_tests: false,
            max_parallel: 1,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.errors.push(message.into());
        self
    }

    pub fn with_status(mut self, status: MissionStatus) -> Self {
        self.status = status;
        self
    }

    /// Invariant 3: dependencies resolved against `completed_task_ids`.
    pub fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| self.completed_task_ids.contains(dep))
    }

    /// All tasks that transitively depend on `task_id`, used for failure
    /// propagation (SKIPPED cascade, §4.6.6).
    pub fn transitive_dependents(&self, task_id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut frontier = vec![task_id.to_string()];
        while let Some(current) = frontier.pop() {
            for t in &self.tasks {
                if t.dependencies.iter().any(|d| d == &current) && !result.contains(&t.id) {
                    result.push(t.id.clone());
                    frontier.push(t.id.clone());
                }
            }
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub worker_id: String,
    pub agent: AgentRole,
    pub task_id: String,
    pub status: SandboxStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            agent: AgentRole::Coder,
            description: "do stuff".into(),
            input_context: String::new(),
            success_criteria: String::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            status: TaskStatus::Pending,
            iteration: 0,
            max_iterations: 3,
            on_failure: OnFailure::Retry,
            target_files: Vec::new(),
            files_affected: Vec::new(),
            elapsed_ms: None,
        }
    }

    #[test]
    fn dependencies_satisfied_checks_completed_set() {
        let mut state = MissionState::new("m1", "do something", InteractionMode::FullAuto);
        let task = sample_task("TASK-002", &["TASK-001"]);
        assert!(!state.dependencies_satisfied(&task));

        state.completed_task_ids.push("TASK-001".to_string());
        assert!(state.dependencies_satisfied(&task));
    }

    #[test]
    fn transitive_dependents_follows_chain() {
        let mut state = MissionState::new("m1", "x", InteractionMode::FullAuto);
        state.tasks.push(sample_task("TASK-001", &[]));
        state.tasks.push(sample_task("TASK-002", &["TASK-001"]));
        state.tasks.push(sample_task("TASK-003", &["TASK-002"]));
        state.tasks.push(sample_task("TASK-004", &[]));

        let mut dependents = state.transitive_dependents("TASK-001");
        dependents.sort();
        assert_eq!(dependents, vec!["TASK-002".to_string(), "TASK-003".to_string()]);
    }

    #[test]
    fn produces_branch_excludes_non_code_roles() {
        let mut task = sample_task("TASK-001", &[]);
        assert!(task.produces_branch());
        task.agent = AgentRole::Tester;
        assert!(!task.produces_branch());
        task.agent = AgentRole::Reviewer;
        assert!(!task.produces_branch());
        task.agent = AgentRole::Researcher;
        assert!(!task.produces_branch());
    }
}

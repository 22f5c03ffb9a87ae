//! Applies per-task evaluation policy to a wave's dispatch results:
//! quality-gate decisions, oscillation forcing, DEPLOYER output
//! classification, merge reconciliation, and failure propagation.
//!
//! These are pure functions over [`MissionState`] plus the small amount of
//! mutable bookkeeping ([`OscillationDetector`]) the spec calls out
//! separately — the engine owns wiring them to the dispatcher and
//! git workspace.

use crate::deploy::{self, DeploymentOutcome};
use crate::gitworkspace::WaveMergeReport;
use crate::mission::types::{AgentRole, MissionState, OnFailure, ReviewFeedback, TaskStatus, TestResult};
use crate::oscillation::OscillationDetector;
use crate::quality_gate::{self, QualityGateDecision};

/// What happened to one CODER/REFACTORER task after its TESTER/REVIEWER
/// sub-dispatch and quality-gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Passed,
    RetryScheduled,
    Failed { reason: String },
}

/// Apply a quality-gate decision (and the oscillation check that takes
/// priority over it) to a VERIFYING task, producing the next `MissionState`
/// (§4.6.1-3).
pub fn apply_quality_gate(
    mut state: MissionState,
    task_id: &str,
    test_result: &TestResult,
    review: &ReviewFeedback,
    oscillation: &mut OscillationDetector,
) -> (MissionState, TaskOutcome) {
    let decision = quality_gate::evaluate(test_result, review);

    if decision.granted {
        if let Some(task) = state.task_mut(task_id) {
            task.status = TaskStatus::Passed;
        }
        if !state.completed_task_ids.contains(&task_id.to_string()) {
            state.completed_task_ids.push(task_id.to_string());
        }
        oscillation.clear(task_id);
        return (state, TaskOutcome::Passed);
    }

    // Oscillation only overrides a path that would otherwise retry: a
    // granted decision never gets second-guessed by the file-change
    // history (§4.6.3 — checked "before admitting a retry").
    let file_changes = state.task(task_id).map(|t| t.files_affected.clone()).unwrap_or_default();
    let iteration = state.task(task_id).map(|t| t.iteration).unwrap_or(0);
    let oscillating = oscillation.record(task_id, iteration, &file_changes);

    if oscillating {
        return fail_task(state, task_id, "oscillation");
    }

    apply_denied_decision(state, task_id, &decision, review)
}

fn apply_denied_decision(
    mut state: MissionState,
    task_id: &str,
    decision: &QualityGateDecision,
    review: &ReviewFeedback,
) -> (MissionState, TaskOutcome) {
    let (max_iterations, iteration, on_failure) = match state.task(task_id) {
        Some(t) => (t.max_iterations, t.iteration, t.on_failure),
        None => return (state, TaskOutcome::Failed { reason: "unknown task".to_string() }),
    };

    if iteration < max_iterations && on_failure == OnFailure::Retry {
        if let Some(task) = state.task_mut(task_id) {
            task.iteration += 1;
            task.status = TaskStatus::Pending;
            task.input_context = append_review_feedback(&task.input_context, review);
        }
        return (state, TaskOutcome::RetryScheduled);
    }

    let reason = decision.message.clone();
    fail_task(state, task_id, &reason)
}

fn append_review_feedback(existing: &str, review: &ReviewFeedback) -> String {
    let mut context = existing.to_string();
    if !context.is_empty() {
        context.push_str("\n\n");
    }
    context.push_str(&format!("# Prior review feedback\nScore: {}/10\n", review.score));
    for issue in &review.issues {
        context.push_str(&format!("Issue: {issue}\n"));
    }
    for suggestion in &review.suggestions {
        context.push_str(&format!("Suggestion: {suggestion}\n"));
    }
    context
}

/// Classify a DEPLOYER task's captured output and apply the resulting
/// policy: success records the deployment URL and marks the task PASSED;
/// any failure retries until `maxIterations` with a diagnostic written into
/// `inputContext` (§4.6.4).
pub fn apply_deployer_result(mut state: MissionState, task_id: &str, output: &str) -> (MissionState, TaskOutcome) {
    let outcome = deploy::classify(output);

    if let DeploymentOutcome::Success { deployment_url } = &outcome {
        if let Some(task) = state.task_mut(task_id) {
            task.status = TaskStatus::Passed;
        }
        if !state.completed_task_ids.contains(&task_id.to_string()) {
            state.completed_task_ids.push(task_id.to_string());
        }
        state.deployment_url = Some(deployment_url.clone());
        return (state, TaskOutcome::Passed);
    }

    let diagnostic = deploy::failure_diagnostic(&outcome);
    let (max_iterations, iteration) = match state.task(task_id) {
        Some(t) => (t.max_iterations, t.iteration),
        None => return (state, TaskOutcome::Failed { reason: "unknown task".to_string() }),
    };

    if iteration < max_iterations {
        if let Some(task) = state.task_mut(task_id) {
            task.iteration += 1;
            task.status = TaskStatus::Pending;
            task.input_context = if task.input_context.is_empty() {
                diagnostic.clone()
            } else {
                format!("{}\n\n{}", task.input_context, diagnostic)
            };
        }
        return (state, TaskOutcome::RetryScheduled);
    }

    fail_task(state, task_id, &diagnostic)
}

/// Mark a task FAILED and cascade SKIPPED to everything that transitively
/// depends on it (§4.6.6, §3 invariant 1).
pub fn fail_task(mut state: MissionState, task_id: &str, reason: &str) -> (MissionState, TaskOutcome) {
    let dependents = state.transitive_dependents(task_id);

    if let Some(task) = state.task_mut(task_id) {
        task.status = TaskStatus::Failed;
    }
    if !state.completed_task_ids.contains(&task_id.to_string()) {
        state.completed_task_ids.push(task_id.to_string());
    }

    for dependent_id in &dependents {
        if let Some(task) = state.task_mut(dependent_id) {
            task.status = TaskStatus::Skipped;
        }
        if !state.completed_task_ids.contains(dependent_id) {
            state.completed_task_ids.push(dependent_id.clone());
        }
    }

    (state, TaskOutcome::Failed { reason: reason.to_string() })
}

/// Reconcile a wave's per-wave merge report: branches that merged cleanly
/// need no further action (their task already passed the quality gate);
/// branches that conflicted reset their task to PENDING with an
/// incremented iteration and a note to rebase against updated mainline
/// (§4.5 "at mission end").
pub fn reconcile_merge_report(mut state: MissionState, report: &WaveMergeReport) -> MissionState {
    for conflicted_id in report.conflicted() {
        if let Some(task) = state.task_mut(conflicted_id) {
            task.iteration += 1;
            task.status = TaskStatus::Pending;
            let note = "merge conflict — rebase against updated mainline";
            task.input_context = if task.input_context.is_empty() {
                note.to_string()
            } else {
                format!("{}\n\n{}", task.input_context, note)
            };
        }
        state.completed_task_ids.retain(|id| id != conflicted_id);
    }
    state
}

/// Whether a role's VERIFYING result needs a synchronous TESTER/REVIEWER
/// sub-dispatch before the quality gate can decide (§4.6.1): only
/// code-producing roles go through the gate at all.
pub fn requires_quality_gate(agent: AgentRole) -> bool {
    agent.produces_branch()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::types::{FileAction, FileRecord, InteractionMode, Task};

    fn base_task(id: &str, agent: AgentRole, on_failure: OnFailure) -> Task {
        Task {
            id: id.to_string(),
            agent,
            description: String::new(),
            input_context: String::new(),
            success_criteria: String::new(),
            dependencies: Vec::new(),
            status: TaskStatus::Verifying,
            iteration: 0,
            max_iterations: 3,
            on_failure,
            target_files: Vec::new(),
            files_affected: vec![FileRecord {
                path: "src/main.rs".to_string(),
                action: FileAction::Modified,
                lines_changed: 5,
            }],
            elapsed_ms: Some(1000),
        }
    }

    fn passing_result(id: &str) -> (TestResult, ReviewFeedback) {
        (
            TestResult {
                task_id: id.to_string(),
                passed: true,
                total_tests: 10,
                failed_tests: 0,
                summary: "all green".to_string(),
                duration_ms: 500,
            },
            ReviewFeedback {
                task_id: id.to_string(),
                approved: true,
                summary: "looks good".to_string(),
                issues: Vec::new(),
                suggestions: Vec::new(),
                score: 9,
            },
        )
    }

    fn state_with(task: Task) -> MissionState {
        let mut state = MissionState::new("mission-1", "build a thing", InteractionMode::FullAuto);
        state.tasks.push(task);
        state
    }

    #[test]
    fn granted_decision_marks_passed_and_completes() {
        let state = state_with(base_task("TASK-001", AgentRole::Coder, OnFailure::Retry));
        let (test_result, review) = passing_result("TASK-001");
        let mut oscillation = OscillationDetector::new();

        let (state, outcome) = apply_quality_gate(state, "TASK-001", &test_result, &review, &mut oscillation);

        assert_eq!(outcome, TaskOutcome::Passed);
        assert_eq!(state.task("TASK-001").unwrap().status, TaskStatus::Passed);
        assert!(state.completed_task_ids.contains(&"TASK-001".to_string()));
    }

    #[test]
    fn denied_decision_schedules_retry_under_budget() {
        let state = state_with(base_task("TASK-001", AgentRole::Coder, OnFailure::Retry));
        let test_result = TestResult {
            task_id: "TASK-001".to_string(),
            passed: false,
            total_tests: 10,
            failed_tests: 2,
            summary: "2 failures".to_string(),
            duration_ms: 500,
        };
        let review = ReviewFeedback {
            task_id: "TASK-001".to_string(),
            approved: true,
            summary: String::new(),
            issues: vec!["off by one".to_string()],
            suggestions: vec!["fix the loop bound".to_string()],
            score: 8,
        };
        let mut oscillation = OscillationDetector::new();

        let (state, outcome) = apply_quality_gate(state, "TASK-001", &test_result, &review, &mut oscillation);

        assert_eq!(outcome, TaskOutcome::RetryScheduled);
        let task = state.task("TASK-001").unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.iteration, 1);
        assert!(task.input_context.contains("off by one"));
    }

    #[test]
    fn denied_decision_fails_when_retry_budget_exhausted() {
        let mut task = base_task("TASK-001", AgentRole::Coder, OnFailure::Retry);
        task.iteration = 3;
        task.max_iterations = 3;
        let state = state_with(task);

        let test_result = TestResult {
            task_id: "TASK-001".to_string(),
            passed: false,
            total_tests: 1,
            failed_tests: 1,
            summary: "still failing".to_string(),
            duration_ms: 10,
        };
        let review = ReviewFeedback {
            task_id: "TASK-001".to_string(),
            approved: true,
            summary: String::new(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            score: 9,
        };
        let mut oscillation = OscillationDetector::new();

        let (state, outcome) = apply_quality_gate(state, "TASK-001", &test_result, &review, &mut oscillation);

        assert!(matches!(outcome, TaskOutcome::Failed { .. }));
        assert_eq!(state.task("TASK-001").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn denied_decision_fails_immediately_when_on_failure_is_abort() {
        let state = state_with(base_task("TASK-001", AgentRole::Coder, OnFailure::Abort));
        let test_result = TestResult {
            task_id: "TASK-001".to_string(),
            passed: false,
            total_tests: 1,
            failed_tests: 1,
            summary: "nope".to_string(),
            duration_ms: 10,
        };
        let review = ReviewFeedback {
            task_id: "TASK-001".to_string(),
            approved: false,
            summary: String::new(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            score: 2,
        };
        let mut oscillation = OscillationDetector::new();

        let (state, outcome) = apply_quality_gate(state, "TASK-001", &test_result, &review, &mut oscillation);
        assert!(matches!(outcome, TaskOutcome::Failed { .. }));
        assert_eq!(state.task("TASK-001").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn oscillation_forces_fail_even_within_retry_budget() {
        let state = state_with(base_task("TASK-001", AgentRole::Coder, OnFailure::Retry));
        let test_result = TestResult {
            task_id: "TASK-001".to_string(),
            passed: false,
            total_tests: 10,
            failed_tests: 2,
            summary: "2 failures".to_string(),
            duration_ms: 500,
        };
        let review = ReviewFeedback {
            task_id: "TASK-001".to_string(),
            approved: true,
            summary: String::new(),
            issues: vec!["off by one".to_string()],
            suggestions: Vec::new(),
            score: 8,
        };
        let mut oscillation = OscillationDetector::new();

        let identical_changes = vec![FileRecord {
            path: "src/main.rs".to_string(),
            action: FileAction::Modified,
            lines_changed: 5,
        }];
        oscillation.record("TASK-001", 0, &identical_changes);
        oscillation.record("TASK-001", 1, &identical_changes);

        let (state, outcome) = apply_quality_gate(state, "TASK-001", &test_result, &review, &mut oscillation);

        match outcome {
            TaskOutcome::Failed { reason } => assert_eq!(reason, "oscillation"),
            other => panic!("expected Failed(oscillation), got {other:?}"),
        }
        assert_eq!(state.task("TASK-001").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn oscillation_does_not_override_a_granted_decision() {
        let state = state_with(base_task("TASK-001", AgentRole::Coder, OnFailure::Retry));
        let (test_result, review) = passing_result("TASK-001");
        let mut oscillation = OscillationDetector::new();

        let identical_changes = vec![FileRecord {
            path: "src/main.rs".to_string(),
            action: FileAction::Modified,
            lines_changed: 5,
        }];
        oscillation.record("TASK-001", 0, &identical_changes);
        oscillation.record("TASK-001", 1, &identical_changes);

        let (state, outcome) = apply_quality_gate(state, "TASK-001", &test_result, &review, &mut oscillation);

        assert_eq!(outcome, TaskOutcome::Passed);
        assert_eq!(state.task("TASK-001").unwrap().status, TaskStatus::Passed);
    }

    #[test]
    fn failing_a_task_cascades_skipped_to_dependents() {
        let mut state = state_with(base_task("TASK-001", AgentRole::Coder, OnFailure::Abort));
        state.tasks.push(base_task("TASK-002", AgentRole::Coder, OnFailure::Abort));
        state.tasks[1].dependencies = vec!["TASK-001".to_string()];
        state.tasks[1].status = TaskStatus::Pending;

        let (state, _) = fail_task(state, "TASK-001", "manual failure");

        assert_eq!(state.task("TASK-001").unwrap().status, TaskStatus::Failed);
        assert_eq!(state.task("TASK-002").unwrap().status, TaskStatus::Skipped);
    }

    #[test]
    fn deployer_success_records_url_and_passes() {
        let state = state_with(base_task("TASK-DEPLOY", AgentRole::Deployer, OnFailure::Retry));
        let output = "App started\nrequested state: started\nroutes: todo-app.apps.example.com";

        let (state, outcome) = apply_deployer_result(state, "TASK-DEPLOY", output);

        assert_eq!(outcome, TaskOutcome::Passed);
        assert_eq!(state.deployment_url, Some("todo-app.apps.example.com".to_string()));
    }

    #[test]
    fn deployer_failure_retries_with_diagnostic() {
        let state = state_with(base_task("TASK-DEPLOY", AgentRole::Deployer, OnFailure::Retry));
        let output = "BUILD FAILURE: compile error";

        let (state, outcome) = apply_deployer_result(state, "TASK-DEPLOY", output);

        assert_eq!(outcome, TaskOutcome::RetryScheduled);
        let task = state.task("TASK-DEPLOY").unwrap();
        assert_eq!(task.iteration, 1);
        assert!(task.input_context.contains("BUILD_FAILURE"));
    }

    #[test]
    fn reconcile_merge_report_resets_conflicted_tasks_to_pending() {
        let mut task = base_task("TASK-001", AgentRole::Coder, OnFailure::Retry);
        task.status = TaskStatus::Passed;
        let mut state = state_with(task);
        state.completed_task_ids.push("TASK-001".to_string());

        let report = WaveMergeReport {
            results: vec![(
                "TASK-001".to_string(),
                crate::gitworkspace::MergeOutcome::Conflict { details: "conflict in src/main.rs".to_string() },
            )],
        };

        let state = reconcile_merge_report(state, &report);

        let task = state.task("TASK-001").unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.iteration, 1);
        assert!(task.input_context.contains("merge conflict"));
        assert!(!state.completed_task_ids.contains(&"TASK-001".to_string()));
    }

    #[test]
    fn requires_quality_gate_true_only_for_code_producing_roles() {
        assert!(requires_quality_gate(AgentRole::Coder));
        assert!(requires_quality_gate(AgentRole::Refactorer));
        assert!(!requires_quality_gate(AgentRole::Tester));
        assert!(!requires_quality_gate(AgentRole::Deployer));
    }
}

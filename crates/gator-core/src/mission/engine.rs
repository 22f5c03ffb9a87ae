//! The top-level mission state machine.
//!
//! `run`/`run_with_state` drive one mission's graph one node at a time:
//! each node takes the current [`MissionState`], produces the next one, and
//! persists a [`crate::checkpoint::Checkpoint`] before the loop continues.
//! Nothing here ever panics or propagates an error past the public
//! boundary — planning/execution failures are captured into
//! `state.errors` and the terminal state (§7).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};

use crate::checkpoint::CheckpointStore;
use crate::dispatcher::AgentDispatcher;
use crate::evaluator::{self, TaskOutcome};
use crate::events::{EventBus, MissionEvent};
use crate::gitworkspace::GitWorkspace;
use crate::mission::types::{
    AgentRole, ExecutionStrategy, InteractionMode, MissionState, MissionStatus, OnFailure, ProjectContext, Task,
    TaskStatus,
};
use crate::oscillation::OscillationDetector;
use crate::planner::{self, DeployerDefaults, PlanningOracle};
use crate::quality_gate;
use crate::sandbox::SandboxProvider;
use crate::wave;

/// Statuses that halt the drive loop pending an external action.
const SUSPENDED_STATUSES: [MissionStatus; 2] = [MissionStatus::Clarifying, MissionStatus::AwaitingApproval];

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub project_path: String,
    pub git_remote_url: Option<String>,
    pub execution_strategy: ExecutionStrategy,
    pub skip_per_task_tests: bool,
    pub create_deployment_task: bool,
    pub max_parallel: u32,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub branch_prefix: String,
    pub runtime_tag: String,
    pub memory_mb: u32,
    pub cpu_millis: u32,
    pub timeout_seconds: u64,
    pub deployment_manifest_path: String,
    pub deployer_defaults: DeployerDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "gator".to_string(),
            runtime_tag: "gator-runtime:latest".to_string(),
            memory_mb: 1024,
            cpu_millis: 2000,
            timeout_seconds: 3600,
            deployment_manifest_path: "manifest.yml".to_string(),
            deployer_defaults: DeployerDefaults::default(),
        }
    }
}

pub struct MissionEngine {
    oracle: Arc<dyn PlanningOracle>,
    sandbox: Arc<dyn SandboxProvider>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<EventBus>,
    config: EngineConfig,
    /// One detector per mission, so a repeating file-change fingerprint is
    /// still caught on the wave after a retry reschedules a task — a
    /// detector scoped to a single `step_execute` call would never see the
    /// same task twice.
    oscillation: Mutex<HashMap<String, OscillationDetector>>,
}

impl MissionEngine {
    pub fn new(
        oracle: Arc<dyn PlanningOracle>,
        sandbox: Arc<dyn SandboxProvider>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            oracle,
            sandbox,
            checkpoints,
            events,
            config,
            oscillation: Mutex::new(HashMap::new()),
        }
    }

    /// Start a fresh mission. Releases any stale checkpoints for
    /// `mission_id` first so that id reuse across restarts never resumes
    /// from a prior mission's history (§4.1).
    pub async fn run(&self, mission_id: &str, request: &str, mode: InteractionMode, options: RunOptions) -> MissionState {
        let _ = self.checkpoints.release(mission_id).await;

        let mut state = MissionState::new(mission_id, request, mode);
        state.project_path = Some(options.project_path.clone());
        state.git_remote_url = options.git_remote_url.clone();
        state.execution_strategy = options.execution_strategy;
        state.skip_per_task_tests = options.skip_per_task_tests;
        state.create_deployment_task = options.create_deployment_task;
        state.max_parallel = options.max_parallel.max(1);

        self.run_with_state(mission_id, state).await
    }

    /// Resume execution from a caller-supplied state (after approval or
    /// clarification).
    pub async fn run_with_state(&self, mission_id: &str, mut state: MissionState) -> MissionState {
        loop {
            state = self.step(state).await;

            self.events.publish(
                mission_id,
                MissionEvent::MissionStatus {
                    mission_id: mission_id.to_string(),
                    status: format!("{:?}", state.status),
                },
            );

            if let Err(e) = self
                .checkpoints
                .put(mission_id, &format!("{:?}", state.status), None, &state)
                .await
            {
                state.errors.push(format!("checkpoint write failed: {e}"));
            }

            if is_terminal(state.status) || SUSPENDED_STATUSES.contains(&state.status) {
                break;
            }
        }

        if state.status == MissionStatus::Failed {
            self.events.publish(
                mission_id,
                MissionEvent::MissionFailed {
                    mission_id: mission_id.to_string(),
                    errors: state.errors.clone(),
                },
            );
        }

        state
    }

    /// Run exactly one node, producing the next state. Never panics: every
    /// branch that can fail captures the error into `state.errors` and
    /// transitions to FAILED instead of propagating (§7).
    async fn step(&self, state: MissionState) -> MissionState {
        match state.status {
            MissionStatus::Classifying | MissionStatus::Uploading => self.step_classify(state).await,
            MissionStatus::Clarifying => self.step_clarify(state).await,
            MissionStatus::Specifying => self.step_specify(state).await,
            MissionStatus::Planning => self.step_plan(state).await,
            MissionStatus::AwaitingApproval => state,
            MissionStatus::Executing => self.step_execute(state).await,
            MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Cancelled => state,
        }
    }

    async fn step_classify(&self, mut state: MissionState) -> MissionState {
        match self.oracle.classify(&state.request).await {
            Ok(classification) => {
                state.classification = Some(classification);
                state.project_context = Some(ProjectContext::default());
                state.status = if state.interaction_mode == InteractionMode::Clarify {
                    MissionStatus::Clarifying
                } else {
                    MissionStatus::Specifying
                };
                state
            }
            Err(e) => fail_mission(state, format!("classification failed: {e}")),
        }
    }

    async fn step_clarify(&self, mut state: MissionState) -> MissionState {
        if !state.clarifying_questions.is_empty() && state.clarifying_answers.is_none() {
            // Already asked; still waiting on an external clarify() call.
            return state;
        }

        let classification = match &state.classification {
            Some(c) => c.clone(),
            None => return fail_mission(state, "clarifying with no classification".to_string()),
        };

        match self.oracle.clarifying_questions(&state.request, &classification).await {
            Ok(questions) if questions.is_empty() => {
                state.status = MissionStatus::Specifying;
                state
            }
            Ok(questions) => {
                state.clarifying_questions = questions;
                state
            }
            Err(e) => fail_mission(state, format!("clarifying-question generation failed: {e}")),
        }
    }

    async fn step_specify(&self, mut state: MissionState) -> MissionState {
        let classification = match &state.classification {
            Some(c) => c.clone(),
            None => return fail_mission(state, "specifying with no classification".to_string()),
        };

        match self
            .oracle
            .product_spec(&state.request, &classification, state.clarifying_answers.as_deref())
            .await
        {
            Ok(spec) => {
                state.product_spec = Some(spec);
                state.status = MissionStatus::Planning;
                state
            }
            Err(e) => fail_mission(state, format!("specification failed: {e}")),
        }
    }

    async fn step_plan(&self, mut state: MissionState) -> MissionState {
        let product_spec = state.product_spec.clone().unwrap_or_default();
        let project = state.project_context.clone().unwrap_or_default();

        let mut plan = match self.oracle.plan(&product_spec, &project).await {
            Ok(plan) => plan,
            Err(e) => return fail_mission(state, format!("planning failed: {e}")),
        };

        if state.create_deployment_task {
            planner::append_deployment_task(&mut plan, &self.config.deployment_manifest_path, &self.config.deployer_defaults);
        }

        if let Err(e) = planner::validate_plan(&plan) {
            return fail_mission(state, format!("invalid plan: {e}"));
        }

        state.execution_strategy = plan.execution_strategy;
        state.project_context = Some(ProjectContext {
            manifest_created_by_task: plan
                .tasks
                .iter()
                .any(|t| t.target_files.iter().any(|f| f == &self.config.deployment_manifest_path)),
            ..project
        });

        state.tasks = plan
            .tasks
            .into_iter()
            .map(|p| Task {
                id: p.id,
                agent: p.agent,
                description: p.description,
                input_context: String::new(),
                success_criteria: p.success_criteria,
                dependencies: p.dependencies,
                status: TaskStatus::Pending,
                iteration: 0,
                max_iterations: p.max_iterations,
                on_failure: p.on_failure,
                target_files: p.target_files,
                files_affected: Vec::new(),
                elapsed_ms: None,
            })
            .collect();

        state.status = if state.interaction_mode == InteractionMode::FullAuto {
            MissionStatus::Executing
        } else {
            MissionStatus::AwaitingApproval
        };
        state
    }

    async fn step_execute(&self, mut state: MissionState) -> MissionState {
        let project_path = state.project_path.clone().unwrap_or_default();
        let git_remote_url = state.git_remote_url.clone();

        let workspace = match GitWorkspace::new(project_path.clone(), None, self.config.branch_prefix.clone()) {
            Ok(ws) => ws,
            Err(e) => return fail_mission(state, format!("git workspace unavailable: {e}")),
        };

        let wave = wave::schedule_next_wave(&state.tasks, &state.completed_task_ids, state.execution_strategy, state.max_parallel);

        if wave.admitted.is_empty() {
            state.status = if state.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
                MissionStatus::Failed
            } else if state.tasks.iter().all(|t| is_settled(t.status)) {
                MissionStatus::Completed
            } else {
                // Nothing admissible but the mission isn't settled: a cycle
                // or unreachable dependency slipped past plan validation.
                state.errors.push("no admissible tasks but mission is not settled".to_string());
                MissionStatus::Failed
            };
            return state;
        }

        state.wave_count += 1;
        state.wave_task_ids = wave.admitted.iter().cloned().collect();

        let dispatcher = AgentDispatcher::new(self.sandbox.as_ref(), self.config.runtime_tag.clone(), self.config.branch_prefix.clone());
        let project = state.project_context.clone().unwrap_or_default();

        let admitted_tasks: Vec<Task> = wave
            .admitted
            .iter()
            .filter_map(|id| state.task(id).cloned())
            .collect();

        let results: Vec<(String, crate::dispatcher::DispatchOutcome)> = stream::iter(admitted_tasks)
            .map(|task| {
                let dispatcher = &dispatcher;
                let project = &project;
                let project_path = &project_path;
                let git_remote_url = git_remote_url.as_deref();
                async move {
                    let outcome = dispatcher
                        .dispatch(
                            &task,
                            project,
                            project_path,
                            git_remote_url,
                            None,
                            self.config.memory_mb,
                            self.config.cpu_millis,
                            self.config.timeout_seconds,
                        )
                        .await;
                    (task.id.clone(), outcome)
                }
            })
            .buffer_unordered(state.max_parallel.max(1) as usize)
            .filter_map(|(id, outcome)| async move { outcome.ok().map(|o| (id, o)) })
            .collect()
            .await;

        for (task_id, outcome) in results {
            if let Some(task) = state.task_mut(&task_id) {
                task.files_affected = outcome.file_changes.clone();
                task.elapsed_ms = Some(outcome.elapsed_ms);
                task.status = outcome.status;
            }

            match outcome.status {
                TaskStatus::Verifying => {
                    state = self
                        .evaluate_verifying_task(
                            state,
                            &task_id,
                            &outcome.output,
                            &dispatcher,
                            &project,
                            &project_path,
                            git_remote_url.as_deref(),
                        )
                        .await;
                }
                TaskStatus::Failed => {
                    let (next_state, task_outcome) = evaluator::fail_task(state, &task_id, "dispatch failed");
                    self.publish_task_failed(&next_state, &task_id, &task_outcome);
                    state = next_state;
                }
                TaskStatus::Passed if state.task(&task_id).map(|t| t.agent) == Some(AgentRole::Deployer) => {
                    let (next_state, task_outcome) = evaluator::apply_deployer_result(state, &task_id, &outcome.output);
                    self.publish_task_failed(&next_state, &task_id, &task_outcome);
                    state = next_state;
                }
                TaskStatus::Passed => {
                    if !state.completed_task_ids.contains(&task_id) {
                        state.completed_task_ids.push(task_id);
                    }
                }
                _ => {}
            }
        }

        let coder_ids: Vec<String> = wave
            .admitted
            .iter()
            .filter(|id| state.task(id).map(|t| t.agent.produces_branch()).unwrap_or(false))
            .cloned()
            .collect();

        if !coder_ids.is_empty() {
            match workspace.merge_wave("mainline", coder_ids) {
                Ok(report) => {
                    state = evaluator::reconcile_merge_report(state, &report);
                }
                Err(e) => state.errors.push(format!("wave merge failed: {e}")),
            }
        }

        self.events.publish(
            &state.mission_id,
            MissionEvent::WaveCompleted {
                mission_id: state.mission_id.clone(),
                wave_count: state.wave_count,
                admitted: wave.admitted,
            },
        );

        state
    }

    /// For a VERIFYING CODER/REFACTORER task, synchronously dispatch a
    /// TESTER and a REVIEWER sub-task against its branch and feed *their*
    /// outputs into the quality gate (§4.6 step 1) — never the coder's own
    /// transcript, which only proves the agent ran, not that it passed.
    #[allow(clippy::too_many_arguments)]
    async fn evaluate_verifying_task(
        &self,
        mut state: MissionState,
        task_id: &str,
        output: &str,
        dispatcher: &AgentDispatcher<'_>,
        project: &ProjectContext,
        project_path: &str,
        git_remote_url: Option<&str>,
    ) -> MissionState {
        if state.task(task_id).map(|t| t.agent) == Some(AgentRole::Deployer) {
            let (next_state, outcome) = evaluator::apply_deployer_result(state, task_id, output);
            self.publish_task_failed(&next_state, task_id, &outcome);
            return next_state;
        }

        if state.skip_per_task_tests {
            if let Some(task) = state.task_mut(task_id) {
                task.status = TaskStatus::Passed;
            }
            if !state.completed_task_ids.contains(&task_id.to_string()) {
                state.completed_task_ids.push(task_id.to_string());
            }
            return state;
        }

        let coder_task = match state.task(task_id) {
            Some(t) => t.clone(),
            None => return state,
        };

        let tester_task = sub_verification_task(&coder_task, AgentRole::Tester);
        let reviewer_task = sub_verification_task(&coder_task, AgentRole::Reviewer);

        let tester_result = dispatcher
            .dispatch(
                &tester_task,
                project,
                project_path,
                git_remote_url,
                None,
                self.config.memory_mb,
                self.config.cpu_millis,
                self.config.timeout_seconds,
            )
            .await;
        let reviewer_result = dispatcher
            .dispatch(
                &reviewer_task,
                project,
                project_path,
                git_remote_url,
                None,
                self.config.memory_mb,
                self.config.cpu_millis,
                self.config.timeout_seconds,
            )
            .await;

        // A sandbox that fails to open/run for the tester or reviewer leaves
        // their output empty, which the parsers already treat as "no test
        // line found"/"not approved" — i.e. a denial, not a silent grant.
        let tester_output = tester_result.as_ref().map(|o| o.output.as_str()).unwrap_or("");
        let reviewer_output = reviewer_result.as_ref().map(|o| o.output.as_str()).unwrap_or("");

        let test_result = quality_gate::parse_test_result(task_id, tester_output, 0);
        let review = quality_gate::parse_review_feedback(task_id, reviewer_output);

        let mission_id = state.mission_id.clone();
        let (next_state, outcome) = {
            let mut oscillation_by_mission = self.oscillation.lock().unwrap_or_else(|e| e.into_inner());
            let detector = oscillation_by_mission.entry(mission_id).or_default();
            evaluator::apply_quality_gate(state, task_id, &test_result, &review, detector)
        };

        if !matches!(outcome, TaskOutcome::Passed) {
            let reason = match &outcome {
                TaskOutcome::Failed { reason } => reason.clone(),
                TaskOutcome::RetryScheduled => "quality gate denied, retry scheduled".to_string(),
                TaskOutcome::Passed => unreachable!(),
            };
            self.events.publish(
                &next_state.mission_id,
                MissionEvent::QualityGateDenied {
                    mission_id: next_state.mission_id.clone(),
                    task_id: task_id.to_string(),
                    reason,
                },
            );
        }
        self.publish_task_failed(&next_state, task_id, &outcome);

        next_state
    }

    fn publish_task_failed(&self, state: &MissionState, task_id: &str, outcome: &TaskOutcome) {
        if let TaskOutcome::Failed { reason } = outcome {
            self.events.publish(
                &state.mission_id,
                MissionEvent::TaskFailed {
                    mission_id: state.mission_id.clone(),
                    task_id: task_id.to_string(),
                    reason: reason.clone(),
                },
            );
        }
    }
}

/// Builds the ephemeral TESTER or REVIEWER task dispatched against a
/// CODER/REFACTORER task's branch. Never added to `state.tasks` — it
/// exists only for the duration of one quality-gate evaluation.
fn sub_verification_task(coder_task: &Task, role: AgentRole) -> Task {
    let (suffix, description) = match role {
        AgentRole::Tester => (
            "tester",
            format!(
                "Run the test suite against the branch produced by {}.",
                coder_task.id
            ),
        ),
        AgentRole::Reviewer => (
            "reviewer",
            format!(
                "Review the diff produced by {} against its success criteria.",
                coder_task.id
            ),
        ),
        _ => ("verify", String::new()),
    };

    Task {
        id: format!("{}-{suffix}", coder_task.id),
        agent: role,
        description,
        input_context: String::new(),
        success_criteria: coder_task.success_criteria.clone(),
        dependencies: vec![coder_task.id.clone()],
        status: TaskStatus::Pending,
        iteration: 0,
        max_iterations: 1,
        on_failure: OnFailure::Abort,
        target_files: Vec::new(),
        files_affected: Vec::new(),
        elapsed_ms: None,
    }
}

fn fail_mission(mut state: MissionState, reason: String) -> MissionState {
    state.errors.push(reason);
    state.status = MissionStatus::Failed;
    state
}

fn is_terminal(status: MissionStatus) -> bool {
    matches!(status, MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Cancelled)
}

fn is_settled(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Passed | TaskStatus::Failed | TaskStatus::Skipped)
}

/// Copies the current state, forces FULL_AUTO, and transitions to
/// EXECUTING (§4.9's `approve(missionId)` contract). The caller is
/// responsible for calling [`MissionEngine::run_with_state`] with the
/// result to resume the drive loop.
pub fn approve(mut state: MissionState) -> MissionState {
    state.interaction_mode = InteractionMode::FullAuto;
    state.status = MissionStatus::Executing;
    state
}

/// Records clarifying answers and resumes the CLARIFYING node so it can
/// proceed to SPECIFYING.
pub fn clarify(mut state: MissionState, answers: &HashMap<String, String>) -> MissionState {
    let joined = answers
        .iter()
        .map(|(q, a)| format!("{q}: {a}"))
        .collect::<Vec<_>>()
        .join("\n");
    state.clarifying_answers = Some(joined);
    state
}

/// Best-effort cancellation: marks the mission CANCELLED. Any in-flight
/// sandbox is torn down by the dispatcher's own always-teardown guarantee
/// once its current call returns; nothing further is scheduled.
pub fn cancel(mut state: MissionState) -> MissionState {
    state.status = MissionStatus::Cancelled;
    state
}

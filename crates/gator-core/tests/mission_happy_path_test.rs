//! End-to-end happy path: one CODER task, verified by an ephemeral
//! TESTER/REVIEWER pair, merged into mainline.
//!
//! Requirements:
//! - A running PostgreSQL instance (testcontainers, or `GATOR_TEST_PG_URL`)
//! - Git available on PATH
//!
//! Drives `MissionEngine::run_with_state` directly against a hand-built
//! `MissionState` seated at EXECUTING, bypassing classify/clarify/specify/
//! plan — the oracle is never consulted on this path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gator_core::checkpoint::PgCheckpointStore;
use gator_core::events::EventBus;
use gator_core::gitworkspace::GitWorkspace;
use gator_core::mission::engine::{EngineConfig, MissionEngine};
use gator_core::mission::types::{
    AgentRole, Classification, ClarifyingQuestion, ExecutionStrategy, FileAction, FileRecord, InteractionMode,
    MissionState, MissionStatus, OnFailure, Task, TaskStatus,
};
use gator_core::planner::{MissionPlan, PlanningError, PlanningOracle};
use gator_core::sandbox::{ExitCode, OpenParams, SandboxError, SandboxProvider};

// ===========================================================================
// Test harness
// ===========================================================================

fn create_temp_git_repo() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    let run = |args: &[&str]| {
        let output = Command::new("git")
            .args(args)
            .current_dir(&repo_path)
            .output()
            .unwrap_or_else(|e| panic!("failed to run git {}: {e}", args.join(" ")));
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    };

    run(&["init"]);
    // `mainline` is the integration branch name the engine hardcodes; check
    // it out explicitly rather than relying on init.defaultBranch.
    run(&["checkout", "-b", "mainline"]);
    run(&["config", "user.email", "test@gator.dev"]);
    run(&["config", "user.name", "Gator Test"]);

    std::fs::write(repo_path.join("README.md"), "# Test repo\n").expect("failed to write README");
    run(&["add", "."]);
    run(&["commit", "-m", "Initial commit"]);

    (dir, repo_path)
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {}: {e}", args.join(" ")));
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Oracle that is never actually invoked: every test in this file seats
/// `MissionState` directly at EXECUTING.
struct UnusedOracle;

#[async_trait]
impl PlanningOracle for UnusedOracle {
    async fn classify(&self, _request: &str) -> Result<Classification, PlanningError> {
        Err(PlanningError::OracleUnavailable("not wired up in this test".into()))
    }

    async fn clarifying_questions(
        &self,
        _request: &str,
        _classification: &Classification,
    ) -> Result<Vec<ClarifyingQuestion>, PlanningError> {
        Err(PlanningError::OracleUnavailable("not wired up in this test".into()))
    }

    async fn product_spec(
        &self,
        _request: &str,
        _classification: &Classification,
        _clarifying_answers: Option<&str>,
    ) -> Result<String, PlanningError> {
        Err(PlanningError::OracleUnavailable("not wired up in this test".into()))
    }

    async fn plan(&self, _product_spec: &str, _project: &gator_core::mission::types::ProjectContext) -> Result<MissionPlan, PlanningError> {
        Err(PlanningError::OracleUnavailable("not wired up in this test".into()))
    }
}

#[derive(Clone)]
struct FakeResponse {
    exit_code: i32,
    output: String,
    file_changes: Vec<FileRecord>,
}

/// A sandbox double keyed by task id (not a separate sandbox id — `open`
/// just echoes `task_id` back). CODER/REFACTORER responses are materialized
/// as a real commit on the task's branch via [`GitWorkspace::create_task_workspace`]
/// so that `step_execute`'s real, unmocked `merge_wave` call has something
/// to merge; TESTER/REVIEWER/DEPLOYER responses are canned transcripts.
struct FakeSandboxProvider {
    workspace: GitWorkspace,
    responses: Mutex<HashMap<String, FakeResponse>>,
}

impl FakeSandboxProvider {
    fn new(workspace: GitWorkspace) -> Self {
        Self {
            workspace,
            responses: Mutex::new(HashMap::new()),
        }
    }

    /// Materializes a CODER/REFACTORER task's branch with the given files
    /// committed, then queues the dispatch response that reports it.
    fn push_branch_response(&self, task_id: &str, files: &[(&str, &str)]) {
        let info = self.workspace.create_task_workspace(task_id).expect("create task workspace");

        let mut file_changes = Vec::new();
        for (path, content) in files {
            let full = info.path.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).expect("failed to create parent dir");
            }
            std::fs::write(&full, content).expect("failed to write file");
            file_changes.push(FileRecord {
                path: path.to_string(),
                action: FileAction::Created,
                lines_changed: content.lines().count() as u32,
            });
        }

        run_git(&info.path, &["add", "-A"]);
        run_git(&info.path, &["commit", "-m", &format!("gator: {task_id}")]);
        self.workspace.remove_task_workspace(&info.path).expect("remove task workspace");

        self.responses.lock().unwrap().insert(
            task_id.to_string(),
            FakeResponse {
                exit_code: 0,
                output: format!("committed changes for {task_id}"),
                file_changes,
            },
        );
    }

    fn push_response(&self, task_id: &str, exit_code: i32, output: &str) {
        self.responses.lock().unwrap().insert(
            task_id.to_string(),
            FakeResponse {
                exit_code,
                output: output.to_string(),
                file_changes: Vec::new(),
            },
        );
    }
}

#[async_trait]
impl SandboxProvider for FakeSandboxProvider {
    async fn open(&self, params: OpenParams) -> Result<String, SandboxError> {
        Ok(params.task_id)
    }

    async fn wait_for_completion(&self, sandbox_id: &str, _timeout_seconds: u64) -> Result<ExitCode, SandboxError> {
        let responses = self.responses.lock().unwrap();
        let resp = responses
            .get(sandbox_id)
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?;
        Ok(ExitCode(resp.exit_code))
    }

    async fn capture_output(&self, sandbox_id: &str) -> Result<String, SandboxError> {
        let responses = self.responses.lock().unwrap();
        let resp = responses
            .get(sandbox_id)
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?;
        Ok(resp.output.clone())
    }

    async fn detect_changes(&self, task_id: &str, _project_path: &str) -> Result<Vec<FileRecord>, SandboxError> {
        let responses = self.responses.lock().unwrap();
        Ok(responses.get(task_id).map(|r| r.file_changes.clone()).unwrap_or_default())
    }

    async fn teardown(&self, _sandbox_id: &str) -> Result<(), SandboxError> {
        Ok(())
    }
}

fn coder_task(id: &str, target_files: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        agent: AgentRole::Coder,
        description: format!("implement {id}"),
        input_context: String::new(),
        success_criteria: "the feature works".to_string(),
        dependencies: Vec::new(),
        status: TaskStatus::Pending,
        iteration: 0,
        max_iterations: 3,
        on_failure: OnFailure::Retry,
        target_files: target_files.iter().map(|s| s.to_string()).collect(),
        files_affected: Vec::new(),
        elapsed_ms: None,
    }
}

fn engine(oracle: Arc<dyn PlanningOracle>, sandbox: Arc<dyn SandboxProvider>, checkpoints: Arc<PgCheckpointStore>) -> MissionEngine {
    MissionEngine::new(
        oracle,
        sandbox,
        checkpoints,
        Arc::new(EventBus::new()),
        EngineConfig {
            branch_prefix: "gator".to_string(),
            ..EngineConfig::default()
        },
    )
}

// ===========================================================================
// Scenario 1: single CODER + TESTER/REVIEWER happy path
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_task_passes_quality_gate_and_merges_to_mainline() {
    let (pool, db_name) = gator_test_utils::create_test_db().await;
    let (_repo_dir, repo_path) = create_temp_git_repo();
    let worktree_base = tempfile::TempDir::new().unwrap();

    let workspace = GitWorkspace::new(&repo_path, Some(worktree_base.path().to_path_buf()), "gator").unwrap();

    let sandbox = Arc::new(FakeSandboxProvider::new(workspace.clone()));
    sandbox.push_branch_response("TASK-001", &[("src/widget.rs", "fn widget() {}\n")]);
    sandbox.push_response("TASK-001-tester", 0, "Tests run: 3, Failures: 0, Errors: 0");
    sandbox.push_response("TASK-001-reviewer", 0, "Score: 8/10\nApproved: yes");

    let checkpoints = Arc::new(PgCheckpointStore::new(pool.clone()));
    let engine = engine(Arc::new(UnusedOracle), sandbox, checkpoints);

    let mut state = MissionState::new("mission-1", "add a widget", InteractionMode::FullAuto);
    state.status = MissionStatus::Executing;
    state.project_path = Some(repo_path.to_string_lossy().to_string());
    state.execution_strategy = ExecutionStrategy::Sequential;
    state.max_parallel = 1;
    state.tasks = vec![coder_task("TASK-001", &["src/widget.rs"])];

    let final_state = engine.run_with_state("mission-1", state).await;

    assert_eq!(final_state.status, MissionStatus::Completed, "errors: {:?}", final_state.errors);
    assert_eq!(final_state.task("TASK-001").unwrap().status, TaskStatus::Passed);
    assert_eq!(final_state.wave_count, 1);
    assert!(final_state.completed_task_ids.contains(&"TASK-001".to_string()));

    let show = Command::new("git")
        .args(["show", "mainline:src/widget.rs"])
        .current_dir(&repo_path)
        .output()
        .unwrap();
    assert!(show.status.success(), "{}", String::from_utf8_lossy(&show.stderr));
    assert_eq!(String::from_utf8_lossy(&show.stdout), "fn widget() {}\n");

    pool.close().await;
    gator_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_tests_deny_the_quality_gate_and_exhaust_retries() {
    let (pool, db_name) = gator_test_utils::create_test_db().await;
    let (_repo_dir, repo_path) = create_temp_git_repo();
    let worktree_base = tempfile::TempDir::new().unwrap();

    let workspace = GitWorkspace::new(&repo_path, Some(worktree_base.path().to_path_buf()), "gator").unwrap();

    let sandbox = Arc::new(FakeSandboxProvider::new(workspace.clone()));
    sandbox.push_branch_response("TASK-001", &[("src/widget.rs", "fn widget() {}\n")]);
    sandbox.push_response("TASK-001-tester", 0, "Tests run: 3, Failures: 1, Errors: 0");
    sandbox.push_response("TASK-001-reviewer", 0, "Score: 8/10\nApproved: yes");

    let checkpoints = Arc::new(PgCheckpointStore::new(pool.clone()));
    let engine = engine(Arc::new(UnusedOracle), sandbox, checkpoints);

    let mut state = MissionState::new("mission-2", "add a widget", InteractionMode::FullAuto);
    state.status = MissionStatus::Executing;
    state.project_path = Some(repo_path.to_string_lossy().to_string());
    state.execution_strategy = ExecutionStrategy::Sequential;
    state.max_parallel = 1;
    // Retries each wave but the tester never reports success, so this runs
    // to the task's max_iterations and the mission settles FAILED.
    let mut task = coder_task("TASK-001", &["src/widget.rs"]);
    task.max_iterations = 3;
    state.tasks = vec![task];

    let final_state = engine.run_with_state("mission-2", state).await;

    assert_eq!(final_state.status, MissionStatus::Failed, "errors: {:?}", final_state.errors);
    let task = final_state.task("TASK-001").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.iteration, 3);

    pool.close().await;
    gator_test_utils::drop_test_db(&db_name).await;
}

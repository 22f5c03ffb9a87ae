//! Oscillation detection: a CODER task that keeps reporting the exact same
//! file-change fingerprint on three consecutive attempts is force-failed,
//! even though its retry budget isn't exhausted.
//!
//! Requirements:
//! - A running PostgreSQL instance (testcontainers, or `GATOR_TEST_PG_URL`)
//! - Git available on PATH

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
    MissionState, MissionStatus, OnFailure, ProjectContext, Task, TaskStatus,
};
use gator_core::planner::{MissionPlan, PlanningError, PlanningOracle};
use gator_core::sandbox::{ExitCode, OpenParams, SandboxError, SandboxProvider};

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

    async fn plan(&self, _product_spec: &str, _project: &ProjectContext) -> Result<MissionPlan, PlanningError> {
        Err(PlanningError::OracleUnavailable("not wired up in this test".into()))
    }
}

#[derive(Clone)]
struct FakeResponse {
    exit_code: i32,
    output: String,
    file_changes: Vec<FileRecord>,
}

/// `step_execute` tries to merge every CODER task's branch at the end of
/// every wave regardless of whether the task ultimately passed, so this
/// provider still needs a real branch behind TASK-001 -- just one commit,
/// reused unchanged across every retry, which is exactly what produces the
/// repeating fingerprint this test is about.
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

    fn materialize_branch(&self, task_id: &str, path: &str, content: &str) {
        let info = self.workspace.create_task_workspace(task_id).expect("create task workspace");
        std::fs::write(info.path.join(path), content).expect("failed to write file");
        run_git(&info.path, &["add", "-A"]);
        run_git(&info.path, &["commit", "-m", &format!("gator: {task_id}")]);
        self.workspace.remove_task_workspace(&info.path).expect("remove task workspace");
    }

    fn push_response(&self, task_id: &str, exit_code: i32, output: &str, file_changes: Vec<FileRecord>) {
        self.responses.lock().unwrap().insert(
            task_id.to_string(),
            FakeResponse {
                exit_code,
                output: output.to_string(),
                file_changes,
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

fn coder_task(id: &str, max_iterations: u32) -> Task {
    Task {
        id: id.to_string(),
        agent: AgentRole::Coder,
        description: format!("implement {id}"),
        input_context: String::new(),
        success_criteria: "the build passes".to_string(),
        dependencies: Vec::new(),
        status: TaskStatus::Pending,
        iteration: 0,
        max_iterations,
        on_failure: OnFailure::Retry,
        target_files: vec!["src/stuck.rs".to_string()],
        files_affected: Vec::new(),
        elapsed_ms: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeating_the_same_file_change_three_times_force_fails_before_the_retry_budget_is_spent() {
    let (pool, db_name) = gator_test_utils::create_test_db().await;
    let (_repo_dir, repo_path) = create_temp_git_repo();
    let worktree_base = tempfile::TempDir::new().unwrap();
    let workspace = GitWorkspace::new(&repo_path, Some(worktree_base.path().to_path_buf()), "gator").unwrap();

    let same_change = vec![FileRecord {
        path: "src/stuck.rs".to_string(),
        action: FileAction::Modified,
        lines_changed: 4,
    }];

    let sandbox = Arc::new(FakeSandboxProvider::new(workspace));
    sandbox.materialize_branch("TASK-001", "src/stuck.rs", "fn stuck() {}\n");
    sandbox.push_response("TASK-001", 0, "agent ran but made no real progress", same_change);
    sandbox.push_response("TASK-001-tester", 0, "Tests run: 2, Failures: 1, Errors: 0");
    sandbox.push_response("TASK-001-reviewer", 0, "Score: 5/10\nApproved: no");

    let checkpoints = Arc::new(PgCheckpointStore::new(pool.clone()));
    let engine = MissionEngine::new(
        Arc::new(UnusedOracle),
        sandbox,
        checkpoints,
        Arc::new(EventBus::new()),
        EngineConfig {
            branch_prefix: "gator".to_string(),
            ..EngineConfig::default()
        },
    );

    let mut state = MissionState::new("mission-oscillation", "fix the stuck module", InteractionMode::FullAuto);
    state.status = MissionStatus::Executing;
    state.project_path = Some(repo_path.to_string_lossy().to_string());
    state.execution_strategy = ExecutionStrategy::Sequential;
    state.max_parallel = 1;
    // Five retries available -- oscillation must trip before they run out.
    state.tasks = vec![coder_task("TASK-001", 5)];

    let final_state = engine.run_with_state("mission-oscillation", state).await;

    assert_eq!(final_state.status, MissionStatus::Failed, "errors: {:?}", final_state.errors);
    let task = final_state.task("TASK-001").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    // The detector trips on the third identical fingerprint, well short of
    // the five-attempt budget this task was given.
    assert_eq!(task.iteration, 2);

    pool.close().await;
    gator_test_utils::drop_test_db(&db_name).await;
}

//! File-overlap deferral: two CODER tasks that both declare `pom.xml` as a
//! target file never run in the same wave, even when `maxParallel` would
//! otherwise admit both.
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
use gator_core::wave;

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
        success_criteria: "the build passes".to_string(),
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

fn engine(sandbox: Arc<dyn SandboxProvider>, checkpoints: Arc<PgCheckpointStore>) -> MissionEngine {
    MissionEngine::new(
        Arc::new(UnusedOracle),
        sandbox,
        checkpoints,
        Arc::new(EventBus::new()),
        EngineConfig {
            branch_prefix: "gator".to_string(),
            ..EngineConfig::default()
        },
    )
}

#[test]
fn scheduler_defers_the_second_candidate_declaring_the_same_target_file() {
    // The pure scheduling rule, checked directly: two PENDING candidates
    // that both declare `pom.xml` never share a wave, even with capacity
    // to spare.
    let tasks = vec![coder_task("TASK-001", &["pom.xml"]), coder_task("TASK-002", &["pom.xml"])];
    let result = wave::schedule_next_wave(&tasks, &Vec::new(), ExecutionStrategy::Parallel, 2);
    assert_eq!(result.admitted, vec!["TASK-001".to_string()]);
    assert_eq!(result.deferred, vec!["TASK-002".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deferred_task_is_admitted_in_a_later_wave_and_both_complete() {
    let (pool, db_name) = gator_test_utils::create_test_db().await;
    let (_repo_dir, repo_path) = create_temp_git_repo();
    let worktree_base = tempfile::TempDir::new().unwrap();

    let workspace = GitWorkspace::new(&repo_path, Some(worktree_base.path().to_path_buf()), "gator").unwrap();

    let sandbox = Arc::new(FakeSandboxProvider::new(workspace.clone()));
    // Both tasks declare pom.xml as a target file (forcing the scheduler to
    // defer one of them), but touch distinct real files so their merges
    // stay conflict-free -- that's exercised separately.
    sandbox.push_branch_response("TASK-001", &[("module-a.txt", "module a\n")]);
    sandbox.push_branch_response("TASK-002", &[("module-b.txt", "module b\n")]);
    for id in ["TASK-001", "TASK-002"] {
        sandbox.push_response(&format!("{id}-tester"), 0, "Tests run: 2, Failures: 0, Errors: 0");
        sandbox.push_response(&format!("{id}-reviewer"), 0, "Score: 9/10\nApproved: yes");
    }

    let checkpoints = Arc::new(PgCheckpointStore::new(pool.clone()));
    let engine = engine(sandbox, checkpoints);

    let mut state = MissionState::new("mission-overlap", "add two modules", InteractionMode::FullAuto);
    state.status = MissionStatus::Executing;
    state.project_path = Some(repo_path.to_string_lossy().to_string());
    state.execution_strategy = ExecutionStrategy::Parallel;
    state.max_parallel = 2;
    state.tasks = vec![coder_task("TASK-001", &["pom.xml"]), coder_task("TASK-002", &["pom.xml"])];

    let final_state = engine.run_with_state("mission-overlap", state).await;

    assert_eq!(final_state.status, MissionStatus::Completed, "errors: {:?}", final_state.errors);
    assert_eq!(final_state.task("TASK-001").unwrap().status, TaskStatus::Passed);
    assert_eq!(final_state.task("TASK-002").unwrap().status, TaskStatus::Passed);
    // Two waves: the overlap rule forbids admitting both tasks together,
    // so completing both takes at least two trips through step_execute.
    assert_eq!(final_state.wave_count, 2);

    for (path, expected) in [("module-a.txt", "module a\n"), ("module-b.txt", "module b\n")] {
        let show = Command::new("git")
            .args(["show", &format!("mainline:{path}")])
            .current_dir(&repo_path)
            .output()
            .unwrap();
        assert!(show.status.success(), "{}", String::from_utf8_lossy(&show.stderr));
        assert_eq!(String::from_utf8_lossy(&show.stdout), expected);
    }

    pool.close().await;
    gator_test_utils::drop_test_db(&db_name).await;
}

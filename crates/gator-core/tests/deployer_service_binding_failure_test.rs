//! DEPLOYER service-binding failure: a deploy attempt that exits 0 (the
//! agent ran) but whose transcript reports `Could not find service
//! todo-db` is never treated as a pass -- it retries with a diagnostic
//! hint written into `input_context`, then fails once retries run out.
//!
//! Requirements:
//! - A running PostgreSQL instance (testcontainers, or `GATOR_TEST_PG_URL`)
//! - Git available on PATH

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gator_core::checkpoint::PgCheckpointStore;
use gator_core::events::EventBus;
use gator_core::mission::engine::{EngineConfig, MissionEngine};
use gator_core::mission::types::{
    AgentRole, Classification, ClarifyingQuestion, ExecutionStrategy, FileRecord, InteractionMode, MissionState,
    MissionStatus, OnFailure, ProjectContext, Task, TaskStatus,
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

/// A DEPLOYER task reports success or failure entirely through its
/// transcript's markers, not its exit code (`AgentRole::Deployer` never
/// produces a branch, so the dispatcher's own classification only cares
/// whether the process exited cleanly). This fake always exits 0 with a
/// fixed failing transcript.
struct FakeSandboxProvider {
    exit_code: i32,
    output: String,
}

#[async_trait]
impl SandboxProvider for FakeSandboxProvider {
    async fn open(&self, params: OpenParams) -> Result<String, SandboxError> {
        Ok(params.task_id)
    }

    async fn wait_for_completion(&self, _sandbox_id: &str, _timeout_seconds: u64) -> Result<ExitCode, SandboxError> {
        Ok(ExitCode(self.exit_code))
    }

    async fn capture_output(&self, _sandbox_id: &str) -> Result<String, SandboxError> {
        Ok(self.output.clone())
    }

    async fn detect_changes(&self, _task_id: &str, _project_path: &str) -> Result<Vec<FileRecord>, SandboxError> {
        Ok(Vec::new())
    }

    async fn teardown(&self, _sandbox_id: &str) -> Result<(), SandboxError> {
        Ok(())
    }
}

fn deployer_task(max_iterations: u32) -> Task {
    Task {
        id: "TASK-DEPLOY".to_string(),
        agent: AgentRole::Deployer,
        description: "deploy the current mainline".to_string(),
        input_context: String::new(),
        success_criteria: "the app is reachable".to_string(),
        dependencies: Vec::new(),
        status: TaskStatus::Pending,
        iteration: 0,
        max_iterations,
        on_failure: OnFailure::Retry,
        target_files: Vec::new(),
        files_affected: Vec::new(),
        elapsed_ms: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_service_binding_retries_then_fails_with_a_diagnostic_hint() {
    let (pool, db_name) = gator_test_utils::create_test_db().await;
    let (_repo_dir, repo_path) = create_temp_git_repo();

    let sandbox = Arc::new(FakeSandboxProvider {
        exit_code: 0,
        output: "Staging complete\nCould not find service todo-db\n".to_string(),
    });

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

    let mut state = MissionState::new("mission-deploy", "deploy the todo app", InteractionMode::FullAuto);
    state.status = MissionStatus::Executing;
    state.project_path = Some(repo_path.to_string_lossy().to_string());
    state.execution_strategy = ExecutionStrategy::Sequential;
    state.max_parallel = 1;
    state.tasks = vec![deployer_task(2)];

    let final_state = engine.run_with_state("mission-deploy", state).await;

    assert_eq!(final_state.status, MissionStatus::Failed, "errors: {:?}", final_state.errors);
    let task = final_state.task("TASK-DEPLOY").unwrap();
    assert_ne!(task.status, TaskStatus::Passed);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.iteration, 2);
    assert!(task.input_context.contains("SERVICE_BINDING_FAILURE"));
    assert!(task.input_context.contains("todo-db"));
    assert!(task.input_context.contains("cf create-service"));
    assert!(final_state.deployment_url.is_none());

    pool.close().await;
    gator_test_utils::drop_test_db(&db_name).await;
}

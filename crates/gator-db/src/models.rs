use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Where a mission sits in the top-level state machine (glossary: "Mission
/// status").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Classifying,
    Uploading,
    Clarifying,
    Specifying,
    Planning,
    AwaitingApproval,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl MissionStatus {
    /// True while the engine still owns forward progress on the mission.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            Self::AwaitingApproval | Self::Completed | Self::Failed | Self::Cancelled
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Classifying => "classifying",
            Self::Uploading => "uploading",
            Self::Clarifying => "clarifying",
            Self::Specifying => "specifying",
            Self::Planning => "planning",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for MissionStatus {
    type Err = MissionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classifying" => Ok(Self::Classifying),
            "uploading" => Ok(Self::Uploading),
            "clarifying" => Ok(Self::Clarifying),
            "specifying" => Ok(Self::Specifying),
            "planning" => Ok(Self::Planning),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(MissionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MissionStatus`] string.
#[derive(Debug, Clone)]
pub struct MissionStatusParseError(pub String);

impl fmt::Display for MissionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid mission status: {:?}", self.0)
    }
}

impl std::error::Error for MissionStatusParseError {}

// ---------------------------------------------------------------------------

/// How much autonomy the mission was submitted with (glossary: "Interaction
/// mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    FullAuto,
    ApprovePlan,
    StepByStep,
    Clarify,
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullAuto => "full_auto",
            Self::ApprovePlan => "approve_plan",
            Self::StepByStep => "step_by_step",
            Self::Clarify => "clarify",
        };
        f.write_str(s)
    }
}

impl FromStr for InteractionMode {
    type Err = InteractionModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_auto" => Ok(Self::FullAuto),
            "approve_plan" => Ok(Self::ApprovePlan),
            "step_by_step" => Ok(Self::StepByStep),
            "clarify" => Ok(Self::Clarify),
            other => Err(InteractionModeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`InteractionMode`] string.
#[derive(Debug, Clone)]
pub struct InteractionModeParseError(pub String);

impl fmt::Display for InteractionModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid interaction mode: {:?}", self.0)
    }
}

impl std::error::Error for InteractionModeParseError {}

// ---------------------------------------------------------------------------

/// Whether ready tasks within a wave run one at a time or concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionStrategy {
    type Err = ExecutionStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(ExecutionStrategyParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ExecutionStrategy`] string.
#[derive(Debug, Clone)]
pub struct ExecutionStrategyParseError(pub String);

impl fmt::Display for ExecutionStrategyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid execution strategy: {:?}", self.0)
    }
}

impl std::error::Error for ExecutionStrategyParseError {}

// ---------------------------------------------------------------------------

/// Fixed label selecting a task's instruction template and branch protocol
/// (glossary: "Agent role").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Coder,
    Tester,
    Reviewer,
    Researcher,
    Refactorer,
    Deployer,
}

impl AgentRole {
    /// CODER and REFACTORER are the roles that own a task branch and are
    /// subject to the empty-diff "lazy model" guard.
    pub fn produces_branch(self) -> bool {
        matches!(self, Self::Coder | Self::Refactorer)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Reviewer => "reviewer",
            Self::Researcher => "researcher",
            Self::Refactorer => "refactorer",
            Self::Deployer => "deployer",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentRole {
    type Err = AgentRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coder" => Ok(Self::Coder),
            "tester" => Ok(Self::Tester),
            "reviewer" => Ok(Self::Reviewer),
            "researcher" => Ok(Self::Researcher),
            "refactorer" => Ok(Self::Refactorer),
            "deployer" => Ok(Self::Deployer),
            other => Err(AgentRoleParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AgentRole`] string.
#[derive(Debug, Clone)]
pub struct AgentRoleParseError(pub String);

impl fmt::Display for AgentRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid agent role: {:?}", self.0)
    }
}

impl std::error::Error for AgentRoleParseError {}

// ---------------------------------------------------------------------------

/// Status of a task (glossary: "Task status").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Verifying,
    Passed,
    Failed,
    Skipped,
    Deferred,
}

impl TaskStatus {
    /// Whether this status counts the task as "completed" for scheduling
    /// purposes (spec invariant: `completedTaskIds` is exactly the set of
    /// tasks with status PASSED or SKIPPED).
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Verifying => "verifying",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Deferred => "deferred",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "verifying" => Ok(Self::Verifying),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "deferred" => Ok(Self::Deferred),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// What the evaluator should do when a task exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Retry,
    Replan,
    Skip,
    Abort,
}

impl fmt::Display for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Retry => "retry",
            Self::Replan => "replan",
            Self::Skip => "skip",
            Self::Abort => "abort",
        };
        f.write_str(s)
    }
}

impl FromStr for OnFailure {
    type Err = OnFailureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "replan" => Ok(Self::Replan),
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(OnFailureParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`OnFailure`] string.
#[derive(Debug, Clone)]
pub struct OnFailureParseError(pub String);

impl fmt::Display for OnFailureParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid on-failure policy: {:?}", self.0)
    }
}

impl std::error::Error for OnFailureParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A mission -- the top-level unit of work submitted by a user.
///
/// The full `MissionState` value used by the engine (gator-core) is
/// reconstructed from this row plus its tasks, dependencies, test results
/// and review feedback; this row only carries the scalar/JSON fields that
/// are cheap to store directly.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Mission {
    pub id: Uuid,
    pub request: String,
    pub interaction_mode: InteractionMode,
    pub status: MissionStatus,
    pub classification: Option<serde_json::Value>,
    pub project_context: Option<serde_json::Value>,
    pub product_spec: Option<serde_json::Value>,
    pub clarifying_questions: Option<serde_json::Value>,
    pub clarifying_answers: Option<String>,
    pub wave_count: i32,
    pub execution_strategy: ExecutionStrategy,
    pub quality_gate_granted: bool,
    pub deployment_url: Option<String>,
    pub errors: Vec<String>,
    pub project_path: String,
    pub git_remote_url: Option<String>,
    pub create_deployment_task: bool,
    pub skip_per_task_tests: bool,
    pub max_parallel: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task -- a unit of work within a mission, keyed by its human-readable
/// id (e.g. `TASK-001`) since that id doubles as merge and dispatch order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub mission_id: Uuid,
    pub agent: AgentRole,
    pub description: String,
    pub input_context: String,
    pub success_criteria: String,
    pub status: TaskStatus,
    pub iteration: i32,
    pub max_iterations: i32,
    pub on_failure: OnFailure,
    pub target_files: Vec<String>,
    pub files_affected: serde_json::Value,
    pub elapsed_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// An edge in the task dependency DAG.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: String,
    pub depends_on: String,
}

/// A recorded TESTER verdict for one attempt at a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TestResultRow {
    pub id: Uuid,
    pub task_id: String,
    pub attempt: i32,
    pub passed: bool,
    pub total_tests: i32,
    pub failed_tests: i32,
    pub summary: String,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A recorded REVIEWER verdict for one attempt at a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReviewFeedbackRow {
    pub id: Uuid,
    pub task_id: String,
    pub attempt: i32,
    pub approved: bool,
    pub summary: String,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub score: i32,
    pub created_at: DateTime<Utc>,
}

/// A durable checkpoint: `(thread_id, checkpoint_id) -> state blob`, plus
/// the node metadata needed to resume without replaying history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckpointRow {
    pub thread_id: String,
    pub checkpoint_id: Uuid,
    pub node_id: String,
    pub next_node_id: Option<String>,
    pub state_blob: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

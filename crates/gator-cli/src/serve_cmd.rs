use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use axum::response::Html;
use gator_core::checkpoint::CheckpointStore;
use gator_core::events::EventBus;
use gator_core::mission::engine::{self, EngineConfig, MissionEngine, RunOptions};
use gator_core::mission::types::{ExecutionStrategy, InteractionMode, MissionState as EngineMissionState, TaskStatus};
use gator_db::models::{AgentEvent, Invariant, Plan, Task};
use gator_db::queries::tasks::PlanProgress;
use gator_db::queries::{
    agent_events,
    gate_results::{self, GateResultWithName},
    invariants as invariant_db, plans as plan_db, tasks as task_db,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub pending: i64,
    pub assigned: i64,
    pub running: i64,
    pub checking: i64,
    pub passed: i64,
    pub failed: i64,
    pub escalated: i64,
    pub total: i64,
}

impl From<PlanProgress> for ProgressResponse {
    fn from(p: PlanProgress) -> Self {
        Self {
            pending: p.pending,
            assigned: p.assigned,
            running: p.running,
            checking: p.checking,
            passed: p.passed,
            failed: p.failed,
            escalated: p.escalated,
            total: p.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenUsageResponse {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize)]
pub struct PlanSummaryResponse {
    #[serde(flatten)]
    pub plan: Plan,
    pub progress: ProgressResponse,
}

#[derive(Debug, Serialize)]
pub struct PlanDetailResponse {
    #[serde(flatten)]
    pub plan: Plan,
    pub progress: ProgressResponse,
    pub token_usage: TokenUsageResponse,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub dependencies: Vec<Uuid>,
    pub invariants: Vec<Invariant>,
    pub events: Vec<AgentEvent>,
    pub gate_results: Vec<GateResultWithName>,
    pub token_usage: TokenUsageResponse,
}

// ---------------------------------------------------------------------------
// Mission engine surface (spec §6)
// ---------------------------------------------------------------------------

/// Everything a mission-engine handler needs, bundled so it can be the
/// `State` of its own sub-router and merged with the plan/task surface
/// above, which keeps its own `PgPool` state untouched.
#[derive(Clone)]
pub struct MissionRuntime {
    pub engine: Arc<MissionEngine>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub events: Arc<EventBus>,
}

#[derive(Debug, Deserialize)]
struct CreateMissionRequest {
    request: String,
    project_path: String,
    #[serde(default)]
    git_remote_url: Option<String>,
    #[serde(default = "default_interaction_mode")]
    interaction_mode: InteractionMode,
    #[serde(default = "default_execution_strategy")]
    execution_strategy: ExecutionStrategy,
    #[serde(default)]
    skip_per_task_tests: bool,
    #[serde(default)]
    create_deployment_task: bool,
    #[serde(default = "default_max_parallel")]
    max_parallel: u32,
}

fn default_interaction_mode() -> InteractionMode {
    InteractionMode::FullAuto
}

fn default_execution_strategy() -> ExecutionStrategy {
    ExecutionStrategy::Sequential
}

fn default_max_parallel() -> u32 {
    1
}

#[derive(Debug, Serialize)]
struct MissionAcceptedResponse {
    mission_id: String,
}

#[derive(Debug, Serialize)]
struct MissionSummaryResponse {
    mission_id: String,
    status: String,
    request: String,
}

#[derive(Debug, Deserialize)]
struct ClarifyMissionRequest {
    answers: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct CheckpointResponse {
    checkpoint_id: Uuid,
    node_id: String,
    next_node_id: Option<String>,
    created_at: DateTime<Utc>,
    state: EngineMissionState,
}

impl From<gator_core::checkpoint::Checkpoint> for CheckpointResponse {
    fn from(c: gator_core::checkpoint::Checkpoint) -> Self {
        Self {
            checkpoint_id: c.checkpoint_id,
            node_id: c.node_id,
            next_node_id: c.next_node_id,
            created_at: c.created_at,
            state: c.state,
        }
    }
}

async fn load_mission(runtime: &MissionRuntime, mission_id: &str) -> Result<EngineMissionState, AppError> {
    runtime
        .checkpoints
        .get_latest(mission_id)
        .await
        .map_err(|e| AppError::internal(e.into()))?
        .map(|c| c.state)
        .ok_or_else(|| AppError::not_found(format!("mission {mission_id} not found")))
}

/// Resumes the drive loop in the background; the HTTP response doesn't wait
/// for the mission to reach a terminal/suspended status (§6: these are
/// async operations, progress is observed via the timeline or SSE stream).
fn resume_in_background(runtime: MissionRuntime, mission_id: String, state: EngineMissionState) {
    tokio::spawn(async move {
        runtime.engine.run_with_state(&mission_id, state).await;
    });
}

async fn create_mission(
    State(runtime): State<MissionRuntime>,
    Json(body): Json<CreateMissionRequest>,
) -> Result<axum::response::Response, AppError> {
    let mission_id = Uuid::new_v4().to_string();
    let options = RunOptions {
        project_path: body.project_path,
        git_remote_url: body.git_remote_url,
        execution_strategy: body.execution_strategy,
        skip_per_task_tests: body.skip_per_task_tests,
        create_deployment_task: body.create_deployment_task,
        max_parallel: body.max_parallel,
    };

    let spawned_id = mission_id.clone();
    let engine = runtime.engine.clone();
    let interaction_mode = body.interaction_mode;
    let request = body.request;
    tokio::spawn(async move {
        engine.run(&spawned_id, &request, interaction_mode, options).await;
    });

    Ok((StatusCode::ACCEPTED, Json(MissionAcceptedResponse { mission_id })).into_response())
}

async fn list_missions(State(runtime): State<MissionRuntime>) -> Result<axum::response::Response, AppError> {
    let ids = runtime
        .checkpoints
        .list_mission_ids()
        .await
        .map_err(|e| AppError::internal(e.into()))?;

    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(checkpoint) = runtime
            .checkpoints
            .get_latest(&id)
            .await
            .map_err(|e| AppError::internal(e.into()))?
        {
            summaries.push(MissionSummaryResponse {
                mission_id: checkpoint.state.mission_id.clone(),
                status: format!("{:?}", checkpoint.state.status),
                request: checkpoint.state.request.clone(),
            });
        }
    }

    Ok(Json(summaries).into_response())
}

async fn get_mission(State(runtime): State<MissionRuntime>, Path(mission_id): Path<String>) -> Result<axum::response::Response, AppError> {
    let state = load_mission(&runtime, &mission_id).await?;
    Ok(Json(state).into_response())
}

async fn approve_mission(
    State(runtime): State<MissionRuntime>,
    Path(mission_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let state = load_mission(&runtime, &mission_id).await?;
    let state = engine::approve(state);
    resume_in_background(runtime, mission_id.clone(), state);
    Ok((StatusCode::ACCEPTED, Json(MissionAcceptedResponse { mission_id })).into_response())
}

async fn clarify_mission(
    State(runtime): State<MissionRuntime>,
    Path(mission_id): Path<String>,
    Json(body): Json<ClarifyMissionRequest>,
) -> Result<axum::response::Response, AppError> {
    let state = load_mission(&runtime, &mission_id).await?;
    let state = engine::clarify(state, &body.answers);
    resume_in_background(runtime, mission_id.clone(), state);
    Ok((StatusCode::ACCEPTED, Json(MissionAcceptedResponse { mission_id })).into_response())
}

async fn cancel_mission(
    State(runtime): State<MissionRuntime>,
    Path(mission_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let state = load_mission(&runtime, &mission_id).await?;
    let state = engine::cancel(state);
    resume_in_background(runtime, mission_id.clone(), state);
    Ok((StatusCode::ACCEPTED, Json(MissionAcceptedResponse { mission_id })).into_response())
}

/// Resets every FAILED task back to PENDING (clearing its recorded error so
/// the wave scheduler admits it again) and resumes the drive loop. Skipped
/// dependents are left as-is; they'll re-settle once their dependency
/// re-passes.
async fn retry_mission(
    State(runtime): State<MissionRuntime>,
    Path(mission_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let mut state = load_mission(&runtime, &mission_id).await?;
    for task in &mut state.tasks {
        if task.status == TaskStatus::Failed {
            task.status = TaskStatus::Pending;
            task.iteration = 0;
        }
    }
    state.status = gator_db::models::MissionStatus::Executing;
    resume_in_background(runtime, mission_id.clone(), state);
    Ok((StatusCode::ACCEPTED, Json(MissionAcceptedResponse { mission_id })).into_response())
}

async fn mission_timeline(
    State(runtime): State<MissionRuntime>,
    Path(mission_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let checkpoints = runtime
        .checkpoints
        .list(&mission_id)
        .await
        .map_err(|e| AppError::internal(e.into()))?;

    if checkpoints.is_empty() {
        return Err(AppError::not_found(format!("mission {mission_id} not found")));
    }

    let timeline: Vec<CheckpointResponse> = checkpoints.into_iter().map(CheckpointResponse::from).collect();
    Ok(Json(timeline).into_response())
}

async fn mission_events(
    State(runtime): State<MissionRuntime>,
    Path(mission_id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = runtime.events.subscribe(&mission_id).map(|published| {
        let event_name = mission_event_name(&published.event);
        let data = serde_json::to_string(&published.event).unwrap_or_default();
        Ok(SseEvent::default().event(event_name).data(data))
    });
    Sse::new(stream)
}

fn mission_event_name(event: &gator_core::events::MissionEvent) -> &'static str {
    use gator_core::events::MissionEvent::*;
    match event {
        MissionStatus { .. } => "mission.status",
        MissionFailed { .. } => "mission.failed",
        TaskStatus { .. } => "task.status",
        TaskFailed { .. } => "task.failed",
        QualityGateDenied { .. } => "quality_gate.denied",
        WaveCompleted { .. } => "wave.completed",
    }
}

fn build_mission_router(runtime: MissionRuntime) -> Router {
    Router::new()
        .route("/missions", post(create_mission).get(list_missions))
        .route("/missions/{id}", get(get_mission))
        .route("/missions/{id}/approve", post(approve_mission))
        .route("/missions/{id}/clarify", post(clarify_mission))
        .route("/missions/{id}/cancel", post(cancel_mission))
        .route("/missions/{id}/retry", post(retry_mission))
        .route("/missions/{id}/timeline", get(mission_timeline))
        .route("/missions/{id}/events", get(mission_events))
        .with_state(runtime)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool, mission: Option<MissionRuntime>) -> Router {
    let legacy_router = Router::new()
        .route("/", get(index))
        .route("/api/plans", get(list_plans))
        .route("/api/plans/{id}", get(get_plan_detail))
        .route("/api/tasks/{id}", get(get_task_detail))
        .route("/api/invariants", get(list_invariants_handler))
        .with_state(pool);

    let router = match mission {
        Some(runtime) => legacy_router.merge(build_mission_router(runtime)),
        None => legacy_router,
    };

    router.layer(CorsLayer::permissive())
}

/// Builds the mission-engine runtime an operator config resolves to: a
/// local docker-per-task sandbox, an Anthropic-backed planning oracle, and
/// Postgres-backed checkpoints/events shared with the legacy plan surface.
pub fn build_mission_runtime(
    pool: PgPool,
    oracle_config: gator_core::planner::AnthropicOracleConfig,
    engine_config: EngineConfig,
) -> MissionRuntime {
    let oracle: Arc<dyn gator_core::planner::PlanningOracle> = Arc::new(gator_core::planner::AnthropicPlanningOracle::new(oracle_config));
    let sandbox: Arc<dyn gator_core::sandbox::SandboxProvider> = Arc::new(gator_core::sandbox::local::LocalSandboxProvider::new());
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(gator_core::checkpoint::PgCheckpointStore::new(pool));
    let events = Arc::new(EventBus::new());

    let engine = Arc::new(MissionEngine::new(oracle, sandbox, checkpoints.clone(), events.clone(), engine_config));

    MissionRuntime { engine, checkpoints, events }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, mission: Option<MissionRuntime>, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool, mission);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("gator serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("gator serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let plans = plan_db::list_plans(&pool)
        .await
        .map_err(AppError::internal)?;

    let rows = if plans.is_empty() {
        "<tr><td colspan=\"3\">No plans found.</td></tr>".to_string()
    } else {
        plans
            .iter()
            .map(|p| {
                format!(
                    "<tr><td><a href=\"/api/plans/{id}\">{name}</a></td><td>{status}</td><td>{id}</td></tr>",
                    id = p.id,
                    name = p.name,
                    status = p.status,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>gator</title></head><body>\
<h1>gator</h1>\
<p><a href=\"/api/plans\">/api/plans</a> | <a href=\"/api/invariants\">/api/invariants</a></p>\
<table><tr><th>Plan</th><th>Status</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn list_plans(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let plans = plan_db::list_plans(&pool)
        .await
        .map_err(AppError::internal)?;

    let mut results = Vec::with_capacity(plans.len());
    for plan in plans {
        let progress = task_db::get_plan_progress(&pool, plan.id)
            .await
            .map_err(AppError::internal)?;
        results.push(PlanSummaryResponse {
            plan,
            progress: progress.into(),
        });
    }

    Ok(Json(results).into_response())
}

async fn get_plan_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let plan = plan_db::get_plan(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;

    let progress = task_db::get_plan_progress(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let tasks = task_db::list_tasks_for_plan(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let (input_tokens, output_tokens) = agent_events::get_token_usage_for_plan(&pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(PlanDetailResponse {
        plan,
        progress: progress.into(),
        token_usage: TokenUsageResponse {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        },
        tasks,
    })
    .into_response())
}

async fn get_task_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let task = task_db::get_task(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    let dependencies = task_db::get_task_dependencies(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let invariants = invariant_db::get_invariants_for_task(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let events = agent_events::list_all_events_for_task(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let gate_results = gate_results::get_latest_gate_results(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let (input_tokens, output_tokens) = agent_events::get_token_usage_for_task(&pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(TaskDetailResponse {
        task,
        dependencies,
        invariants,
        events,
        gate_results,
        token_usage: TokenUsageResponse {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        },
    })
    .into_response())
}

async fn list_invariants_handler(
    State(pool): State<PgPool>,
) -> Result<axum::response::Response, AppError> {
    let invariants = invariant_db::list_invariants(&pool)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(invariants).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Database query functions for the `missions` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ExecutionStrategy, InteractionMode, Mission, MissionStatus};

/// Parameters for creating a new mission. Everything past `request` has a
/// sensible default so callers can construct this with `..Default::default()`.
#[derive(Debug, Clone)]
pub struct NewMission {
    pub request: String,
    pub interaction_mode: InteractionMode,
    pub project_path: String,
    pub git_remote_url: Option<String>,
    pub create_deployment_task: bool,
    pub skip_per_task_tests: bool,
    pub max_parallel: i32,
}

impl Default for NewMission {
    fn default() -> Self {
        Self {
            request: String::new(),
            interaction_mode: InteractionMode::FullAuto,
            project_path: String::new(),
            git_remote_url: None,
            create_deployment_task: false,
            skip_per_task_tests: false,
            max_parallel: 3,
        }
    }
}

/// Insert a new mission row in `classifying` status.
pub async fn insert_mission(pool: &PgPool, new: &NewMission) -> Result<Mission> {
    let mission = sqlx::query_as::<_, Mission>(
        "INSERT INTO missions \
            (request, interaction_mode, status, execution_strategy, project_path, \
             git_remote_url, create_deployment_task, skip_per_task_tests, max_parallel) \
         VALUES ($1, $2, 'classifying', 'sequential', $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&new.request)
    .bind(new.interaction_mode)
    .bind(&new.project_path)
    .bind(&new.git_remote_url)
    .bind(new.create_deployment_task)
    .bind(new.skip_per_task_tests)
    .bind(new.max_parallel)
    .fetch_one(pool)
    .await
    .context("failed to insert mission")?;

    Ok(mission)
}

/// Fetch a mission by id.
pub async fn get_mission(pool: &PgPool, id: Uuid) -> Result<Option<Mission>> {
    let mission = sqlx::query_as::<_, Mission>("SELECT * FROM missions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch mission")?;

    Ok(mission)
}

/// List all missions, newest first.
pub async fn list_missions(pool: &PgPool) -> Result<Vec<Mission>> {
    let missions =
        sqlx::query_as::<_, Mission>("SELECT * FROM missions ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .context("failed to list missions")?;

    Ok(missions)
}

/// Overwrite a mission's status, bumping `updated_at`. No status-machine
/// validation here -- the engine is responsible for only calling this with
/// legal transitions, since the legal-transition table lives in
/// `gator-core` alongside the rest of the mission state machine.
pub async fn set_status(pool: &PgPool, id: Uuid, status: MissionStatus) -> Result<()> {
    let result = sqlx::query("UPDATE missions SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update mission status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("mission {id} not found");
    }
    Ok(())
}

/// Persist the classifier's output and advance to `clarifying` or
/// `specifying` per the caller's chosen next status.
pub async fn record_classification(
    pool: &PgPool,
    id: Uuid,
    classification: &serde_json::Value,
    next_status: MissionStatus,
) -> Result<()> {
    sqlx::query(
        "UPDATE missions SET classification = $1, status = $2, updated_at = now() WHERE id = $3",
    )
    .bind(classification)
    .bind(next_status)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record classification")?;

    Ok(())
}

/// Persist clarifying questions and move the mission to `clarifying`.
pub async fn record_clarifying_questions(
    pool: &PgPool,
    id: Uuid,
    questions: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "UPDATE missions \
         SET clarifying_questions = $1, status = 'clarifying', updated_at = now() \
         WHERE id = $2",
    )
    .bind(questions)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record clarifying questions")?;

    Ok(())
}

/// Record the user's free-text answers and move the mission to `specifying`.
pub async fn record_clarifying_answers(pool: &PgPool, id: Uuid, answers: &str) -> Result<()> {
    sqlx::query(
        "UPDATE missions \
         SET clarifying_answers = $1, status = 'specifying', updated_at = now() \
         WHERE id = $2",
    )
    .bind(answers)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record clarifying answers")?;

    Ok(())
}

/// Persist the generated product spec and move the mission to `planning`.
pub async fn record_product_spec(
    pool: &PgPool,
    id: Uuid,
    product_spec: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "UPDATE missions \
         SET product_spec = $1, status = 'planning', updated_at = now() \
         WHERE id = $2",
    )
    .bind(product_spec)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record product spec")?;

    Ok(())
}

/// Record the wave count and chosen execution strategy once the DAG is
/// built, and move the mission into `awaiting_approval` or straight to
/// `executing` depending on interaction mode.
pub async fn record_plan(
    pool: &PgPool,
    id: Uuid,
    wave_count: i32,
    execution_strategy: ExecutionStrategy,
    next_status: MissionStatus,
) -> Result<()> {
    sqlx::query(
        "UPDATE missions \
         SET wave_count = $1, execution_strategy = $2, status = $3, updated_at = now() \
         WHERE id = $4",
    )
    .bind(wave_count)
    .bind(execution_strategy)
    .bind(next_status)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record plan")?;

    Ok(())
}

/// Record the final quality-gate decision and deployment URL (if any), and
/// move the mission to its terminal status.
pub async fn record_completion(
    pool: &PgPool,
    id: Uuid,
    quality_gate_granted: bool,
    deployment_url: Option<&str>,
    status: MissionStatus,
) -> Result<()> {
    sqlx::query(
        "UPDATE missions \
         SET quality_gate_granted = $1, deployment_url = $2, status = $3, updated_at = now() \
         WHERE id = $4",
    )
    .bind(quality_gate_granted)
    .bind(deployment_url)
    .bind(status)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record mission completion")?;

    Ok(())
}

/// Append an error message to the mission's error list.
pub async fn append_error(pool: &PgPool, id: Uuid, message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE missions SET errors = array_append(errors, $1), updated_at = now() WHERE id = $2",
    )
    .bind(message)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to append mission error")?;

    Ok(())
}

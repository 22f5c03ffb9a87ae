//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AgentRole, OnFailure, Task, TaskStatus};

/// Parameters for inserting a new task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub mission_id: Uuid,
    pub agent: AgentRole,
    pub description: String,
    pub input_context: String,
    pub success_criteria: String,
    pub max_iterations: i32,
    pub on_failure: OnFailure,
    pub target_files: Vec<String>,
}

/// Insert a new task row in `pending` status.
pub async fn insert_task(pool: &PgPool, new: &NewTask) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
            (id, mission_id, agent, description, input_context, success_criteria, \
             status, iteration, max_iterations, on_failure, target_files, files_affected) \
         VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, $8, $9, '[]'::jsonb) \
         RETURNING *",
    )
    .bind(&new.id)
    .bind(new.mission_id)
    .bind(new.agent)
    .bind(&new.description)
    .bind(&new.input_context)
    .bind(&new.success_criteria)
    .bind(new.max_iterations)
    .bind(new.on_failure)
    .bind(&new.target_files)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by id.
pub async fn get_task(pool: &PgPool, task_id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks belonging to a mission, ordered by id (the canonical
/// merge/dispatch order).
pub async fn list_tasks(pool: &PgPool, mission_id: Uuid) -> Result<Vec<Task>> {
    let tasks =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE mission_id = $1 ORDER BY id")
            .bind(mission_id)
            .fetch_all(pool)
            .await
            .context("failed to list tasks")?;

    Ok(tasks)
}

/// Overwrite a task's status. No transition validation here: the scheduler
/// and evaluator in `gator-core` own the legal-transition table.
pub async fn set_status(pool: &PgPool, task_id: &str, status: TaskStatus) -> Result<()> {
    let result = sqlx::query("UPDATE tasks SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to update task status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {task_id} not found");
    }
    Ok(())
}

/// Increment a task's iteration counter (called once per dispatch attempt).
pub async fn increment_iteration(pool: &PgPool, task_id: &str) -> Result<i32> {
    let (iteration,): (i32,) = sqlx::query_as(
        "UPDATE tasks SET iteration = iteration + 1 WHERE id = $1 RETURNING iteration",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to increment task iteration")?;

    Ok(iteration)
}

/// Record the files a dispatch touched and the wall-clock time it took.
pub async fn record_files_affected(
    pool: &PgPool,
    task_id: &str,
    files_affected: &serde_json::Value,
    elapsed_ms: i64,
) -> Result<()> {
    sqlx::query("UPDATE tasks SET files_affected = $1, elapsed_ms = $2 WHERE id = $3")
        .bind(files_affected)
        .bind(elapsed_ms)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to record files affected")?;

    Ok(())
}

/// Tasks whose dependencies are all satisfied (passed or skipped) and that
/// are still pending themselves. This is a convenience read over live rows
/// used for status reporting; it is not the scheduler -- `gator_core::wave`
/// computes actual wave admission as a pure function so its output is
/// reproducible independent of database state (spec invariant I5).
pub async fn ready_task_ids(pool: &PgPool, mission_id: Uuid) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT t.id FROM tasks t \
         WHERE t.mission_id = $1 AND t.status = 'pending' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies d \
               JOIN tasks dep ON dep.id = d.depends_on \
               WHERE d.task_id = t.id AND dep.status NOT IN ('passed', 'skipped') \
           ) \
         ORDER BY t.id",
    )
    .bind(mission_id)
    .fetch_all(pool)
    .await
    .context("failed to compute ready tasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

//! Database query functions for the `checkpoints` table.
//!
//! A checkpoint is keyed by `(thread_id, checkpoint_id)`: `thread_id`
//! identifies the mission (or, for sub-runs, a task-scoped thread) and
//! `checkpoint_id` identifies one durable snapshot within it. The engine
//! writes a new checkpoint after every node transition and only advances
//! to the next node once the write is confirmed (spec §2, "Durability").

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::CheckpointRow;

/// Write a new checkpoint. Checkpoints are never updated once written.
pub async fn insert_checkpoint(
    pool: &PgPool,
    thread_id: &str,
    node_id: &str,
    next_node_id: Option<&str>,
    state_blob: &serde_json::Value,
) -> Result<CheckpointRow> {
    let row = sqlx::query_as::<_, CheckpointRow>(
        "INSERT INTO checkpoints (thread_id, checkpoint_id, node_id, next_node_id, state_blob) \
         VALUES ($1, gen_random_uuid(), $2, $3, $4) \
         RETURNING *",
    )
    .bind(thread_id)
    .bind(node_id)
    .bind(next_node_id)
    .bind(state_blob)
    .fetch_one(pool)
    .await
    .context("failed to insert checkpoint")?;

    Ok(row)
}

/// Fetch the most recent checkpoint for a thread, used to resume a mission
/// after a restart.
pub async fn get_latest(pool: &PgPool, thread_id: &str) -> Result<Option<CheckpointRow>> {
    let row = sqlx::query_as::<_, CheckpointRow>(
        "SELECT * FROM checkpoints WHERE thread_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(thread_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest checkpoint")?;

    Ok(row)
}

/// Fetch one checkpoint by its full key.
pub async fn get_checkpoint(
    pool: &PgPool,
    thread_id: &str,
    checkpoint_id: Uuid,
) -> Result<Option<CheckpointRow>> {
    let row = sqlx::query_as::<_, CheckpointRow>(
        "SELECT * FROM checkpoints WHERE thread_id = $1 AND checkpoint_id = $2",
    )
    .bind(thread_id)
    .bind(checkpoint_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch checkpoint")?;

    Ok(row)
}

/// List a thread's checkpoints in chronological order (its full timeline,
/// spec §6 `GET /missions/{id}/timeline`).
pub async fn list_checkpoints(pool: &PgPool, thread_id: &str) -> Result<Vec<CheckpointRow>> {
    let rows = sqlx::query_as::<_, CheckpointRow>(
        "SELECT * FROM checkpoints WHERE thread_id = $1 ORDER BY created_at ASC",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await
    .context("failed to list checkpoints")?;

    Ok(rows)
}

/// List every distinct thread id with at least one checkpoint, most
/// recently active first (spec §6 `GET /missions`).
pub async fn list_mission_ids(pool: &PgPool) -> Result<Vec<String>> {
    let ids: Vec<(String,)> = sqlx::query_as(
        "SELECT thread_id FROM checkpoints GROUP BY thread_id ORDER BY MAX(created_at) DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list mission ids")?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Release (delete) all checkpoints for a thread. Called once a mission's
/// work has been fully absorbed on intake of a new request that
/// supersedes it -- see the data-loss hazard recorded in DESIGN.md for the
/// one open question this raises.
pub async fn release_thread(pool: &PgPool, thread_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = $1")
        .bind(thread_id)
        .execute(pool)
        .await
        .context("failed to release checkpoint thread")?;

    Ok(result.rows_affected())
}

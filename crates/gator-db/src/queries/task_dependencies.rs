//! Database query functions for the `task_dependencies` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TaskDependency;

/// Insert one dependency edge (`task_id` depends on `depends_on`).
pub async fn insert_dependency(pool: &PgPool, task_id: &str, depends_on: &str) -> Result<()> {
    sqlx::query("INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2)")
        .bind(task_id)
        .bind(depends_on)
        .execute(pool)
        .await
        .context("failed to insert task dependency")?;

    Ok(())
}

/// List every dependency edge for a mission's tasks, used to rebuild the
/// DAG in memory when reconstructing `MissionState`.
pub async fn list_dependencies(pool: &PgPool, mission_id: Uuid) -> Result<Vec<TaskDependency>> {
    let rows = sqlx::query_as::<_, TaskDependency>(
        "SELECT d.task_id, d.depends_on FROM task_dependencies d \
         JOIN tasks t ON t.id = d.task_id \
         WHERE t.mission_id = $1 \
         ORDER BY d.task_id, d.depends_on",
    )
    .bind(mission_id)
    .fetch_all(pool)
    .await
    .context("failed to list task dependencies")?;

    Ok(rows)
}

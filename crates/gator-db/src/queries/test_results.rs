//! Database query functions for the `test_results` table.
//!
//! Rows here are append-only: every TESTER attempt at a task gets its own
//! row rather than overwriting the previous one, so a mission's full
//! history of test runs survives a retry.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::TestResultRow;

/// Parsed TESTER verdict ready for insertion (spec §4.7 parsing rules).
#[derive(Debug, Clone)]
pub struct NewTestResult {
    pub task_id: String,
    pub attempt: i32,
    pub passed: bool,
    pub total_tests: i32,
    pub failed_tests: i32,
    pub summary: String,
    pub duration_ms: i64,
}

pub async fn insert_test_result(pool: &PgPool, new: &NewTestResult) -> Result<TestResultRow> {
    let row = sqlx::query_as::<_, TestResultRow>(
        "INSERT INTO test_results \
            (task_id, attempt, passed, total_tests, failed_tests, summary, duration_ms) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&new.task_id)
    .bind(new.attempt)
    .bind(new.passed)
    .bind(new.total_tests)
    .bind(new.failed_tests)
    .bind(&new.summary)
    .bind(new.duration_ms)
    .fetch_one(pool)
    .await
    .context("failed to insert test result")?;

    Ok(row)
}

/// The most recent test result recorded for a task, if any.
pub async fn latest_test_result(pool: &PgPool, task_id: &str) -> Result<Option<TestResultRow>> {
    let row = sqlx::query_as::<_, TestResultRow>(
        "SELECT * FROM test_results WHERE task_id = $1 ORDER BY attempt DESC LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest test result")?;

    Ok(row)
}

/// All test results recorded for a task, oldest attempt first.
pub async fn list_test_results(pool: &PgPool, task_id: &str) -> Result<Vec<TestResultRow>> {
    let rows = sqlx::query_as::<_, TestResultRow>(
        "SELECT * FROM test_results WHERE task_id = $1 ORDER BY attempt ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list test results")?;

    Ok(rows)
}

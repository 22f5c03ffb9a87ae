//! Database query functions for the `review_feedback` table.
//!
//! Like `test_results`, rows are append-only: one row per REVIEWER attempt.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::ReviewFeedbackRow;

/// Parsed REVIEWER verdict ready for insertion (spec §4.7 parsing rules).
#[derive(Debug, Clone)]
pub struct NewReviewFeedback {
    pub task_id: String,
    pub attempt: i32,
    pub approved: bool,
    pub summary: String,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub score: i32,
}

pub async fn insert_review_feedback(
    pool: &PgPool,
    new: &NewReviewFeedback,
) -> Result<ReviewFeedbackRow> {
    let row = sqlx::query_as::<_, ReviewFeedbackRow>(
        "INSERT INTO review_feedback \
            (task_id, attempt, approved, summary, issues, suggestions, score) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&new.task_id)
    .bind(new.attempt)
    .bind(new.approved)
    .bind(&new.summary)
    .bind(&new.issues)
    .bind(&new.suggestions)
    .bind(new.score)
    .fetch_one(pool)
    .await
    .context("failed to insert review feedback")?;

    Ok(row)
}

/// The most recent review feedback recorded for a task, if any.
pub async fn latest_review_feedback(
    pool: &PgPool,
    task_id: &str,
) -> Result<Option<ReviewFeedbackRow>> {
    let row = sqlx::query_as::<_, ReviewFeedbackRow>(
        "SELECT * FROM review_feedback WHERE task_id = $1 ORDER BY attempt DESC LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest review feedback")?;

    Ok(row)
}

/// All review feedback recorded for a task, oldest attempt first.
pub async fn list_review_feedback(pool: &PgPool, task_id: &str) -> Result<Vec<ReviewFeedbackRow>> {
    let rows = sqlx::query_as::<_, ReviewFeedbackRow>(
        "SELECT * FROM review_feedback WHERE task_id = $1 ORDER BY attempt ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list review feedback")?;

    Ok(rows)
}

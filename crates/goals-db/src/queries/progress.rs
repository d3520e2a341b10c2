//! Database query functions for the append-only `goal_progress` log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::models::Progress;

/// Append one progress entry recording a handler invocation.
pub async fn insert_progress(
    exec: impl PgExecutor<'_>,
    goal_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    success: bool,
    message: Option<&str>,
    traceback: Option<&str>,
) -> Result<Progress> {
    let progress = sqlx::query_as::<_, Progress>(
        "INSERT INTO goal_progress \
         (goal_id, started_at, finished_at, success, message, traceback) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(goal_id)
    .bind(started_at)
    .bind(finished_at)
    .bind(success)
    .bind(message)
    .bind(traceback)
    .fetch_one(exec)
    .await
    .context("failed to insert progress")?;

    Ok(progress)
}

/// Count progress entries for a goal.
pub async fn count_progress(exec: impl PgExecutor<'_>, goal_id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM goal_progress WHERE goal_id = $1")
        .bind(goal_id)
        .fetch_one(exec)
        .await
        .context("failed to count progress")?;

    Ok(row.0)
}

/// List all progress entries for a goal, oldest first.
pub async fn list_progress_for_goal(
    exec: impl PgExecutor<'_>,
    goal_id: Uuid,
) -> Result<Vec<Progress>> {
    let entries = sqlx::query_as::<_, Progress>(
        "SELECT * FROM goal_progress WHERE goal_id = $1 ORDER BY started_at ASC",
    )
    .bind(goal_id)
    .fetch_all(exec)
    .await
    .context("failed to list progress for goal")?;

    Ok(entries)
}

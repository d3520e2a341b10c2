//! Database query functions for the out-of-transaction `worker_tracking`
//! table.
//!
//! Callers must run these on the dedicated tracking pool, never on the
//! dispatch transaction: the whole point of the table is that its rows
//! commit immediately and survive a worker crash that rolls back the
//! dispatch transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

/// Record an attempt just before handler invocation.
///
/// `ON CONFLICT DO NOTHING`: the same worker re-dispatching the same goal
/// (after a recoverable failure) keeps the original `started_at`.
pub async fn insert_tracking(
    exec: impl PgExecutor<'_>,
    worker_id: &str,
    goal_id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO worker_tracking (worker_id, goal_id, started_at) \
         VALUES ($1, $2, $3) \
         ON CONFLICT DO NOTHING",
    )
    .bind(worker_id)
    .bind(goal_id)
    .bind(started_at)
    .execute(exec)
    .await
    .context("failed to insert worker tracking row")?;

    Ok(())
}

/// Remove the attempt record after the invocation is safely recorded.
pub async fn delete_tracking(
    exec: impl PgExecutor<'_>,
    worker_id: &str,
    goal_id: Uuid,
) -> Result<()> {
    sqlx::query("DELETE FROM worker_tracking WHERE worker_id = $1 AND goal_id = $2")
        .bind(worker_id)
        .bind(goal_id)
        .execute(exec)
        .await
        .context("failed to delete worker tracking row")?;

    Ok(())
}

/// Goals with at least `threshold` surviving tracking rows, with their
/// row counts. These are the goals that have repeatedly killed workers.
pub async fn killer_goals(exec: impl PgExecutor<'_>, threshold: i64) -> Result<Vec<(Uuid, i64)>> {
    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT goal_id, COUNT(*) AS attempts \
         FROM worker_tracking \
         GROUP BY goal_id \
         HAVING COUNT(*) >= $1",
    )
    .bind(threshold)
    .fetch_all(exec)
    .await
    .context("failed to query killer goals")?;

    Ok(rows)
}

/// Remove all tracking rows for a goal (after the guard marks it corrupted).
pub async fn delete_tracking_for_goal(exec: impl PgExecutor<'_>, goal_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM worker_tracking WHERE goal_id = $1")
        .bind(goal_id)
        .execute(exec)
        .await
        .context("failed to delete tracking rows for goal")?;

    Ok(result.rows_affected())
}

/// Count tracking rows for a goal.
pub async fn count_tracking_for_goal(exec: impl PgExecutor<'_>, goal_id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM worker_tracking WHERE goal_id = $1")
        .bind(goal_id)
        .fetch_one(exec)
        .await
        .context("failed to count tracking rows")?;

    Ok(row.0)
}

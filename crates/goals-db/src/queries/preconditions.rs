//! Database query functions for the `goal_preconditions` edge table.

use anyhow::{Context, Result};
use sqlx::postgres::PgExecutor;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::GoalState;

/// Insert a precondition edge: `dependent_id` waits on `prerequisite_id`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_edge(
    exec: impl PgExecutor<'_>,
    dependent_id: Uuid,
    prerequisite_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO goal_preconditions (dependent_id, prerequisite_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(dependent_id)
    .bind(prerequisite_id)
    .execute(exec)
    .await
    .context("failed to insert precondition edge")?;

    Ok(())
}

/// Remove every edge of a dependent goal.
pub async fn clear_edges(exec: impl PgExecutor<'_>, dependent_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM goal_preconditions WHERE dependent_id = $1")
        .bind(dependent_id)
        .execute(exec)
        .await
        .context("failed to clear precondition edges")?;

    Ok(result.rows_affected())
}

/// Replace a dependent's edge set with the given prerequisites.
///
/// Handlers may rewrite their goal's prerequisites on every invocation, so
/// this runs as delete-then-insert on the caller's connection (normally the
/// dispatch transaction).
pub async fn replace_edges(
    conn: &mut PgConnection,
    dependent_id: Uuid,
    prerequisite_ids: &[Uuid],
) -> Result<()> {
    clear_edges(&mut *conn, dependent_id).await?;
    for prerequisite_id in prerequisite_ids {
        insert_edge(&mut *conn, dependent_id, *prerequisite_id).await?;
    }
    Ok(())
}

/// Get the IDs of all prerequisites of a goal.
pub async fn get_prerequisites(exec: impl PgExecutor<'_>, dependent_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT prerequisite_id FROM goal_preconditions WHERE dependent_id = $1")
            .bind(dependent_id)
            .fetch_all(exec)
            .await
            .context("failed to get prerequisites")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Get the states of all prerequisites of a goal.
///
/// The transition engine only needs the states, not the full rows.
pub async fn get_prerequisite_states(
    exec: impl PgExecutor<'_>,
    dependent_id: Uuid,
) -> Result<Vec<GoalState>> {
    let rows: Vec<(GoalState,)> = sqlx::query_as(
        "SELECT g.state FROM goal_preconditions e \
         JOIN goals g ON g.id = e.prerequisite_id \
         WHERE e.dependent_id = $1",
    )
    .bind(dependent_id)
    .fetch_all(exec)
    .await
    .context("failed to get prerequisite states")?;

    Ok(rows.into_iter().map(|(state,)| state).collect())
}

/// Get the dependents of a prerequisite that are currently waiting on
/// their preconditions. These are the only goals the resolver may move.
pub async fn get_waiting_dependents(
    exec: impl PgExecutor<'_>,
    prerequisite_id: Uuid,
) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT e.dependent_id FROM goal_preconditions e \
         JOIN goals d ON d.id = e.dependent_id \
         WHERE e.prerequisite_id = $1 \
           AND d.state = 'waiting_for_preconditions'",
    )
    .bind(prerequisite_id)
    .fetch_all(exec)
    .await
    .context("failed to get waiting dependents")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

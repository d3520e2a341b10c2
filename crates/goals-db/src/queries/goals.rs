//! Database query functions for the `goals` table.
//!
//! Functions take `impl PgExecutor` so they run equally on a pool or on an
//! open transaction; the dispatcher and resolver do all state writes inside
//! their transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::{Goal, GoalState, PreconditionsMode};

/// Insert a new goal row. Returns the inserted goal with server-generated
/// defaults (id, created_at, updated_at).
#[allow(clippy::too_many_arguments)]
pub async fn insert_goal(
    exec: impl PgExecutor<'_>,
    handler: &str,
    args: &serde_json::Value,
    kwargs: &serde_json::Value,
    state: GoalState,
    precondition_date: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    preconditions_mode: PreconditionsMode,
    precondition_failures_allowed: bool,
) -> Result<Goal> {
    let goal = sqlx::query_as::<_, Goal>(
        "INSERT INTO goals \
         (handler, args, kwargs, state, precondition_date, deadline, \
          preconditions_mode, precondition_failures_allowed) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(handler)
    .bind(args)
    .bind(kwargs)
    .bind(state)
    .bind(precondition_date)
    .bind(deadline)
    .bind(preconditions_mode)
    .bind(precondition_failures_allowed)
    .fetch_one(exec)
    .await
    .context("failed to insert goal")?;

    Ok(goal)
}

/// Fetch a single goal by ID.
pub async fn get_goal(exec: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Goal>> {
    let goal = sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
        .context("failed to fetch goal")?;

    Ok(goal)
}

/// Claim the next ready goal under a row lock.
///
/// Must run inside a transaction; the lock is held until commit/rollback.
/// `SKIP LOCKED` lets concurrent workers pass over rows already claimed by
/// another transaction instead of blocking on them.
///
/// A goal is claimable when it is waiting for a worker, or waiting for a
/// date whose gate has passed. With a deadline horizon, only goals whose
/// deadline falls within `now + horizon` are considered; goals without a
/// deadline are excluded from horizon-bounded workers.
pub async fn claim_next_goal(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    horizon_cutoff: Option<DateTime<Utc>>,
) -> Result<Option<Goal>> {
    let goal = match horizon_cutoff {
        None => {
            sqlx::query_as::<_, Goal>(
                "SELECT * FROM goals \
                 WHERE state = 'waiting_for_worker' \
                    OR (state = 'waiting_for_date' AND precondition_date <= $1) \
                 ORDER BY precondition_date ASC NULLS FIRST, created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED",
            )
            .bind(now)
            .fetch_optional(&mut *conn)
            .await
        }
        Some(cutoff) => {
            sqlx::query_as::<_, Goal>(
                "SELECT * FROM goals \
                 WHERE (state = 'waiting_for_worker' \
                        OR (state = 'waiting_for_date' AND precondition_date <= $1)) \
                   AND deadline IS NOT NULL AND deadline <= $2 \
                 ORDER BY precondition_date ASC NULLS FIRST, created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED",
            )
            .bind(now)
            .bind(cutoff)
            .fetch_optional(&mut *conn)
            .await
        }
    }
    .context("failed to claim next goal")?;

    Ok(goal)
}

/// Update the state of a goal unconditionally, touching `updated_at`.
pub async fn set_goal_state(exec: impl PgExecutor<'_>, id: Uuid, state: GoalState) -> Result<u64> {
    let result = sqlx::query("UPDATE goals SET state = $1, updated_at = NOW() WHERE id = $2")
        .bind(state)
        .bind(id)
        .execute(exec)
        .await
        .context("failed to update goal state")?;

    Ok(result.rows_affected())
}

/// Atomically transition a goal from one state to another.
///
/// Uses optimistic locking: the UPDATE's WHERE clause includes
/// `state = $from`, so the row is only updated if the current state matches
/// the expected `from` value. Returns the number of rows affected (0 means
/// the state did not match).
pub async fn transition_goal_state(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    from: GoalState,
    to: GoalState,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE goals SET state = $1, updated_at = NOW() WHERE id = $2 AND state = $3",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(exec)
    .await
    .context("failed to transition goal state")?;

    Ok(result.rows_affected())
}

/// Update state and precondition date together (the retry path).
pub async fn set_goal_state_and_gate(
    exec: impl PgExecutor<'_>,
    id: Uuid,
    state: GoalState,
    precondition_date: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE goals \
         SET state = $1, \
             precondition_date = COALESCE($2, precondition_date), \
             updated_at = NOW() \
         WHERE id = $3",
    )
    .bind(state)
    .bind(precondition_date)
    .bind(id)
    .execute(exec)
    .await
    .context("failed to update goal state and gate")?;

    Ok(result.rows_affected())
}

/// List all goals currently in a given state, oldest first.
pub async fn list_goals_by_state(exec: impl PgExecutor<'_>, state: GoalState) -> Result<Vec<Goal>> {
    let goals =
        sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE state = $1 ORDER BY created_at ASC")
            .bind(state)
            .fetch_all(exec)
            .await
            .context("failed to list goals by state")?;

    Ok(goals)
}

/// Count goals per state.
pub async fn state_counts(exec: impl PgExecutor<'_>) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT state::text, COUNT(*) AS cnt \
         FROM goals \
         GROUP BY state \
         ORDER BY state",
    )
    .fetch_all(exec)
    .await
    .context("failed to count goals by state")?;

    Ok(rows)
}

/// Delete achieved goals older than the cutoff that no non-terminal goal
/// still depends on. Returns the number of goals deleted.
///
/// Failed goals are never deleted: an external foreign key gone NULL means
/// "completed successfully long ago and reaped", and deleting a failed goal
/// would silently recode it as success. Edges, progress, and tracking rows
/// go with the goal via FK cascade.
pub async fn delete_reapable_achieved(
    exec: impl PgExecutor<'_>,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM goals g \
         WHERE g.state = 'achieved' \
           AND g.updated_at < $1 \
           AND NOT EXISTS ( \
               SELECT 1 FROM goal_preconditions e \
               JOIN goals d ON d.id = e.dependent_id \
               WHERE e.prerequisite_id = g.id \
                 AND d.state NOT IN \
                     ('achieved', 'given_up', 'corrupted', 'not_going_to_happen_soon') \
           )",
    )
    .bind(cutoff)
    .execute(exec)
    .await
    .context("failed to delete reapable achieved goals")?;

    Ok(result.rows_affected())
}

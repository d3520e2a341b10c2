//! Precondition resolver: propagates a goal's terminal state to its
//! dependents.
//!
//! Runs inside the same transaction that set the source goal terminal, so
//! observers either see the full cascade or none of it. This is the only
//! code that moves a goal out of waiting-for-preconditions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use goals_db::models::GoalState;
use goals_db::queries::{goals as goal_db, preconditions as edge_db};

use crate::transition::next_state;

/// Re-evaluate every dependent of `goal_id` that is currently waiting on
/// its preconditions, cascading transitively through dependents that
/// themselves become terminal.
///
/// Returns the number of goals that became ready for a worker, so the
/// caller can publish a wake-up after commit.
pub async fn resolve_after_terminal(
    conn: &mut PgConnection,
    goal_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut woken = 0u64;
    // Explicit work stack; the cascade depth is unbounded in principle and
    // async fns cannot recurse without boxing.
    let mut stack = vec![goal_id];

    while let Some(source) = stack.pop() {
        let dependents = edge_db::get_waiting_dependents(&mut *conn, source).await?;

        for dependent_id in dependents {
            let Some(dependent) = goal_db::get_goal(&mut *conn, dependent_id).await? else {
                continue;
            };
            let prereq_states =
                edge_db::get_prerequisite_states(&mut *conn, dependent_id).await?;
            let target = next_state(&dependent, &prereq_states, now);

            if target == dependent.state {
                continue;
            }

            goal_db::set_goal_state(&mut *conn, dependent_id, target).await?;
            tracing::debug!(
                goal_id = %dependent_id,
                from = %dependent.state,
                to = %target,
                "resolver moved dependent"
            );

            if target == GoalState::WaitingForWorker {
                woken += 1;
            }
            // A dependent that itself went terminal (a propagated failure)
            // has dependents of its own to re-evaluate.
            if target.is_terminal() {
                stack.push(dependent_id);
            }
        }
    }

    Ok(woken)
}

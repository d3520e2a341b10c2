//! Killer-task guard: detects goals that repeatedly crash workers.
//!
//! A worker that dies mid-handler (OOM, segfault) never reaches the
//! rollback that would have recorded a failure, but its tracking row was
//! written on the autocommit connection and survives. Enough surviving
//! rows for one goal means the goal itself is taking workers down.

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;

use goals_db::models::GoalState;
use goals_db::queries::{goals as goal_db, progress as progress_db, tracking as tracking_db};

use crate::resolver::resolve_after_terminal;

/// Scan the tracking table and corrupt every goal with at least
/// `threshold` surviving attempt rows. Runs at worker startup, on the
/// tracking pool, outside any dispatch transaction.
///
/// Returns the number of goals reaped.
pub async fn reap_killer_goals(tracking: &PgPool, threshold: i64) -> Result<u64> {
    let killers = tracking_db::killer_goals(tracking, threshold).await?;
    let mut reaped = 0u64;

    for (goal_id, attempts) in killers {
        let mut side = tracking.begin().await?;

        let goal = goal_db::get_goal(&mut *side, goal_id).await?;
        match goal {
            Some(goal) if !goal.state.is_terminal() => {
                let now = Utc::now();
                goal_db::set_goal_state(&mut *side, goal_id, GoalState::Corrupted).await?;
                progress_db::insert_progress(
                    &mut *side,
                    goal_id,
                    now,
                    now,
                    false,
                    Some("goal repeatedly killed workers"),
                    None,
                )
                .await?;
                resolve_after_terminal(&mut side, goal_id, now).await?;
                tracing::warn!(
                    goal_id = %goal_id,
                    attempts,
                    "killer goal marked corrupted"
                );
            }
            _ => {
                // Already terminal or gone; just clear the evidence.
            }
        }

        tracking_db::delete_tracking_for_goal(&mut *side, goal_id).await?;
        side.commit().await?;
        reaped += 1;
    }

    Ok(reaped)
}

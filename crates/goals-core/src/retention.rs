//! Retention sweeper: deletes achieved goals past the retention window.
//!
//! Failed goals are never deleted. External schemas referencing goals are
//! expected to use `ON DELETE SET NULL`; a NULL reference reads as
//! "completed successfully long ago and reaped", which is why recoding a
//! failure as NULL must never happen.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::PgPool;

use goals_db::queries::goals as goal_db;

use crate::config::EngineConfig;

/// How often the busy worker sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Delete achieved goals older than the retention window that no
/// non-terminal goal still depends on. Goals with live referents are
/// skipped this round and reconsidered on the next.
///
/// Returns the number of goals deleted; 0 when retention is disabled.
pub async fn sweep(pool: &PgPool, config: &EngineConfig, now: DateTime<Utc>) -> Result<u64> {
    let Some(retention) = config.retention else {
        return Ok(0);
    };
    let Ok(window) = TimeDelta::from_std(retention) else {
        return Ok(0);
    };

    let deleted = goal_db::delete_reapable_achieved(pool, now - window).await?;
    if deleted > 0 {
        tracing::info!(deleted, "retention sweep removed achieved goals");
    }
    Ok(deleted)
}

//! `goals status` command: per-state goal counts.

use anyhow::Result;
use sqlx::PgPool;

use goals_db::models::GoalState;
use goals_db::queries::goals as goal_db;

/// Print a count of goals per state, including zeroes for empty states.
pub async fn run_status(pool: &PgPool) -> Result<()> {
    let counts = goal_db::state_counts(pool).await?;

    if counts.is_empty() {
        println!("No goals found.");
        return Ok(());
    }

    let total: i64 = counts.iter().map(|(_, n)| n).sum();

    println!("{:<28} {:>8}", "STATE", "COUNT");
    println!("{}", "-".repeat(37));
    for state in GoalState::ALL {
        let name = state.to_string();
        let count = counts
            .iter()
            .find(|(s, _)| *s == name)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        println!("{name:<28} {count:>8}");
    }
    println!("{}", "-".repeat(37));
    println!("{:<28} {total:>8}", "total");

    Ok(())
}

//! `goals show` command: one goal's row, edges, and recent progress.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use goals_db::queries::{goals as goal_db, preconditions as edge_db, progress as progress_db};

/// How many trailing progress entries to print.
const PROGRESS_TAIL: usize = 10;

/// Print a goal's details.
pub async fn run_show(pool: &PgPool, goal_id_str: &str) -> Result<()> {
    let goal_id =
        Uuid::parse_str(goal_id_str).with_context(|| format!("invalid goal ID: {goal_id_str}"))?;

    let goal = goal_db::get_goal(pool, goal_id)
        .await?
        .with_context(|| format!("goal {goal_id} not found"))?;

    println!("Goal: {}", goal.id);
    println!("Handler: {}", goal.handler);
    println!("State: {}", goal.state);
    println!(
        "Mode: {} (failures {})",
        goal.preconditions_mode,
        if goal.precondition_failures_allowed {
            "allowed"
        } else {
            "fatal"
        }
    );
    if let Some(date) = goal.precondition_date {
        println!("Not before: {}", date.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(deadline) = goal.deadline {
        println!("Deadline: {}", deadline.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Created: {}", goal.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated: {}", goal.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));

    let prerequisites = edge_db::get_prerequisites(pool, goal_id).await?;
    if !prerequisites.is_empty() {
        println!();
        println!("Prerequisites:");
        for prerequisite_id in &prerequisites {
            match goal_db::get_goal(pool, *prerequisite_id).await? {
                Some(p) => println!("  {} [{}] {}", p.id, p.state, p.handler),
                None => println!("  {prerequisite_id} (missing)"),
            }
        }
    }

    let progress = progress_db::list_progress_for_goal(pool, goal_id).await?;
    println!();
    println!("Progress: {} entries", progress.len());
    for entry in progress.iter().rev().take(PROGRESS_TAIL).rev() {
        let marker = if entry.success { "+" } else { "!" };
        let message = entry.message.as_deref().unwrap_or("");
        println!(
            "  [{}] {} {}",
            marker,
            entry.started_at.format("%Y-%m-%d %H:%M:%S"),
            message
        );
    }

    Ok(())
}

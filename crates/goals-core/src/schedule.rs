//! Scheduling API: create goals and edges atomically, plus the
//! administrative operations that move goals by operator decision rather
//! than by dispatch.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use goals_db::models::{Goal, GoalState, PreconditionsMode};
use goals_db::queries::{goals as goal_db, preconditions as edge_db};

use crate::config::EngineConfig;
use crate::notify;
use crate::resolver::resolve_after_terminal;
use crate::transition::next_state;

/// Everything needed to create a goal.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub handler: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub precondition_date: Option<DateTime<Utc>>,
    pub precondition_goals: Vec<Uuid>,
    pub preconditions_mode: PreconditionsMode,
    pub precondition_failures_allowed: bool,
    /// When `None`, filled with now + the configured default deadline so
    /// horizon-bounded workers still see the goal.
    pub deadline: Option<DateTime<Utc>>,
    pub blocked: bool,
}

impl ScheduleRequest {
    /// A request with the given handler and every other field defaulted.
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            args: serde_json::json!([]),
            kwargs: serde_json::json!({}),
            precondition_date: None,
            precondition_goals: Vec::new(),
            preconditions_mode: PreconditionsMode::All,
            precondition_failures_allowed: true,
            deadline: None,
            blocked: false,
        }
    }

    pub fn args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: serde_json::Value) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn precondition_date(mut self, date: DateTime<Utc>) -> Self {
        self.precondition_date = Some(date);
        self
    }

    pub fn precondition_goals(mut self, prerequisites: Vec<Uuid>) -> Self {
        self.precondition_goals = prerequisites;
        self
    }

    pub fn preconditions_mode(mut self, mode: PreconditionsMode) -> Self {
        self.preconditions_mode = mode;
        self
    }

    pub fn precondition_failures_allowed(mut self, allowed: bool) -> Self {
        self.precondition_failures_allowed = allowed;
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }
}

/// Create a goal and its precondition edges atomically.
///
/// The initial state is `Blocked` when requested, else computed from the
/// prerequisites' current states. Publishes a wake-up when the goal is
/// immediately ready.
pub async fn schedule(pool: &PgPool, config: &EngineConfig, req: ScheduleRequest) -> Result<Goal> {
    let now = Utc::now();
    let deadline = req.deadline.or_else(|| {
        TimeDelta::from_std(config.default_deadline)
            .ok()
            .map(|d| now + d)
    });

    let mut tx = pool
        .begin()
        .await
        .context("failed to begin schedule transaction")?;

    // Insert with a provisional state, wire up the edges, then let the
    // transition engine decide where the goal actually starts.
    let provisional = if req.blocked {
        GoalState::Blocked
    } else {
        GoalState::WaitingForWorker
    };

    let mut goal = goal_db::insert_goal(
        &mut *tx,
        &req.handler,
        &req.args,
        &req.kwargs,
        provisional,
        req.precondition_date,
        deadline,
        req.preconditions_mode,
        req.precondition_failures_allowed,
    )
    .await?;

    for prerequisite_id in &req.precondition_goals {
        edge_db::insert_edge(&mut *tx, goal.id, *prerequisite_id).await?;
    }

    if !req.blocked {
        let prereq_states = edge_db::get_prerequisite_states(&mut *tx, goal.id).await?;
        let initial = next_state(&goal, &prereq_states, now);
        if initial != goal.state {
            goal_db::set_goal_state(&mut *tx, goal.id, initial).await?;
        }
        goal.state = initial;
    }

    tx.commit()
        .await
        .context("failed to commit schedule transaction")?;

    tracing::info!(
        goal_id = %goal.id,
        handler = %goal.handler,
        state = %goal.state,
        "scheduled goal"
    );

    if goal.state == GoalState::WaitingForWorker {
        notify::publish(pool).await?;
    }

    Ok(goal)
}

/// Force a non-terminal goal to `Blocked` so no worker pursues it.
pub async fn block(pool: &PgPool, goal_id: Uuid) -> Result<Goal> {
    let mut tx = pool.begin().await?;

    let goal = goal_db::get_goal(&mut *tx, goal_id)
        .await?
        .with_context(|| format!("goal {goal_id} not found"))?;

    if goal.state.is_terminal() {
        bail!(
            "cannot block goal {}: state {} is terminal",
            goal_id,
            goal.state
        );
    }

    // Optimistic: only block the state we just observed.
    let rows =
        goal_db::transition_goal_state(&mut *tx, goal_id, goal.state, GoalState::Blocked).await?;
    if rows == 0 {
        bail!(
            "cannot block goal {}: state changed concurrently from {}",
            goal_id,
            goal.state
        );
    }
    tx.commit().await?;

    tracing::info!(goal_id = %goal_id, "goal blocked");
    goal_db::get_goal(pool, goal_id)
        .await?
        .with_context(|| format!("goal {goal_id} disappeared"))
}

/// Release a blocked goal: recompute its state from its prerequisites.
pub async fn unblock(pool: &PgPool, goal_id: Uuid) -> Result<Goal> {
    let goal = reevaluate_from(pool, goal_id, GoalState::Blocked, "unblock").await?;
    Ok(goal)
}

/// Administrative retry: pull a failed goal out of its terminal state and
/// let the engine pursue it again. The only sanctioned way a terminal goal
/// changes state.
pub async fn retry(pool: &PgPool, goal_id: Uuid) -> Result<Goal> {
    let mut tx = pool.begin().await?;

    let goal = goal_db::get_goal(&mut *tx, goal_id)
        .await?
        .with_context(|| format!("goal {goal_id} not found"))?;

    if !goal.state.is_failure() {
        bail!(
            "cannot retry goal {}: state {} is not a failure state",
            goal_id,
            goal.state
        );
    }

    let target = recomputed_state(&mut tx, &goal).await?;
    let rows = goal_db::transition_goal_state(&mut *tx, goal_id, goal.state, target).await?;
    if rows == 0 {
        bail!(
            "cannot retry goal {}: state changed concurrently from {}",
            goal_id,
            goal.state
        );
    }
    if target.is_terminal() {
        resolve_after_terminal(&mut tx, goal_id, Utc::now()).await?;
    }
    tx.commit().await?;

    tracing::info!(goal_id = %goal_id, state = %target, "goal retried by operator");

    if target == GoalState::WaitingForWorker {
        notify::publish(pool).await?;
    }

    goal_db::get_goal(pool, goal_id)
        .await?
        .with_context(|| format!("goal {goal_id} disappeared"))
}

/// Shared unblock path: require `expected` state, recompute, apply.
async fn reevaluate_from(
    pool: &PgPool,
    goal_id: Uuid,
    expected: GoalState,
    verb: &str,
) -> Result<Goal> {
    let mut tx = pool.begin().await?;

    let goal = goal_db::get_goal(&mut *tx, goal_id)
        .await?
        .with_context(|| format!("goal {goal_id} not found"))?;

    if goal.state != expected {
        bail!(
            "cannot {} goal {}: state is {}, expected {}",
            verb,
            goal_id,
            goal.state,
            expected
        );
    }

    let target = recomputed_state(&mut tx, &goal).await?;
    let rows = goal_db::transition_goal_state(&mut *tx, goal_id, expected, target).await?;
    if rows == 0 {
        bail!(
            "cannot {} goal {}: state changed concurrently from {}",
            verb,
            goal_id,
            expected
        );
    }
    if target.is_terminal() {
        resolve_after_terminal(&mut tx, goal_id, Utc::now()).await?;
    }
    tx.commit().await?;

    tracing::info!(goal_id = %goal_id, state = %target, "goal re-evaluated");

    if target == GoalState::WaitingForWorker {
        notify::publish(pool).await?;
    }

    goal_db::get_goal(pool, goal_id)
        .await?
        .with_context(|| format!("goal {goal_id} disappeared"))
}

/// Compute where a goal lands once its current (blocked/terminal) state is
/// set aside.
async fn recomputed_state(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    goal: &Goal,
) -> Result<GoalState> {
    // next_state leaves blocked and terminal states untouched, so evaluate
    // a copy that is already back in circulation.
    let mut candidate = goal.clone();
    candidate.state = GoalState::WaitingForWorker;
    let prereq_states = edge_db::get_prerequisite_states(&mut **tx, goal.id).await?;
    Ok(next_state(&candidate, &prereq_states, Utc::now()))
}

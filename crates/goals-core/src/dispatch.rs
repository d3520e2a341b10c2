//! The dispatcher: claims one ready goal under a row lock, runs its
//! handler, and records the outcome.
//!
//! Each worker owns two connection pools. The main pool carries the
//! dispatch transaction; the tracking pool commits every statement
//! immediately, so attempt records written on it survive a worker crash
//! that takes the main transaction down with it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use goals_db::models::{Goal, GoalState};
use goals_db::store::Store;
use goals_db::queries::{
    goals as goal_db, preconditions as edge_db, progress as progress_db, tracking as tracking_db,
};

use crate::config::EngineConfig;
use crate::handler::{HandlerRegistry, Outcome};
use crate::notify;
use crate::resolver::resolve_after_terminal;
use crate::transition::next_state;

/// Result of one dispatch iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A goal was claimed and its handler invoked.
    Progressed { goal_id: Uuid },
    /// Nothing to do.
    Idle,
}

/// Build a worker identifier unique across processes and restarts.
pub fn generate_worker_id() -> String {
    format!("worker-{}-{}", std::process::id(), Uuid::new_v4().simple())
}

/// Claims and executes goals, one at a time.
pub struct Dispatcher {
    store: Store,
    worker_id: String,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    /// Deadline horizon: only goals with `deadline <= now + horizon` are
    /// claimed. `None` claims regardless of deadline.
    horizon: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// The store carries the worker's two connections: dispatch
    /// transactions run on `store.pool`, attempt tracking commits
    /// immediately on `store.tracking`.
    pub fn new(
        store: Store,
        worker_id: String,
        registry: Arc<HandlerRegistry>,
        config: EngineConfig,
        horizon: Option<Duration>,
    ) -> Self {
        Self {
            store,
            worker_id,
            registry,
            config,
            horizon,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run one dispatch iteration: claim, track, invoke, record, notify.
    pub async fn dispatch_one(&self) -> Result<Dispatch> {
        let now = Utc::now();
        let horizon_cutoff = self
            .horizon
            .map(|h| now + chrono::TimeDelta::from_std(h).unwrap_or_default());

        let mut tx = self
            .store
            .pool
            .begin()
            .await
            .context("failed to begin dispatch transaction")?;

        let Some(goal) = goal_db::claim_next_goal(&mut tx, now, horizon_cutoff).await? else {
            return Ok(Dispatch::Idle);
        };

        tracing::debug!(
            goal_id = %goal.id,
            handler = %goal.handler,
            worker_id = %self.worker_id,
            "claimed goal"
        );

        // Attempt record, outside the transaction. If this worker dies
        // before the delete below, the row remains as crash evidence.
        tracking_db::insert_tracking(&self.store.tracking, &self.worker_id, goal.id, now).await?;

        let Some(handler) = self.registry.get(&goal.handler) else {
            // Configuration drift: the persisted identifier has no
            // registered handler. No progress entry for this.
            tracing::error!(
                goal_id = %goal.id,
                handler = %goal.handler,
                "unknown handler identifier, marking goal corrupted"
            );
            goal_db::set_goal_state(&mut *tx, goal.id, GoalState::Corrupted).await?;
            resolve_after_terminal(&mut tx, goal.id, now).await?;
            tracking_db::delete_tracking(&self.store.tracking, &self.worker_id, goal.id).await?;
            tx.commit().await.context("failed to commit dispatch")?;
            notify::publish(&self.store.pool).await?;
            return Ok(Dispatch::Progressed { goal_id: goal.id });
        };

        let started_at = Utc::now();
        let call = handler.handle(&mut tx, &goal);
        let outcome = match self.config.time_limit {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "handler exceeded wall time limit of {}s",
                    limit.as_secs()
                )),
            },
            None => call.await,
        };
        let finished_at = Utc::now();

        let final_state = match outcome {
            Ok(outcome) => {
                self.record_outcome(&mut tx, &goal, outcome, started_at, finished_at)
                    .await?
            }
            Err(err) => {
                match self
                    .record_failure(&mut tx, &goal, &err, started_at, finished_at)
                    .await
                {
                    Ok(state) => state,
                    Err(record_err) => {
                        // The transaction itself is unusable: roll back and
                        // record the corruption on the side connection.
                        tracing::error!(
                            goal_id = %goal.id,
                            handler_error = %err,
                            record_error = %record_err,
                            "dispatch transaction unusable, marking goal corrupted out of band"
                        );
                        drop(tx);
                        self.corrupt_out_of_band(&goal, started_at, finished_at, &err)
                            .await?;
                        notify::publish(&self.store.pool).await?;
                        return Ok(Dispatch::Progressed { goal_id: goal.id });
                    }
                }
            }
        };

        // Progress cap: a goal that has consumed its whole budget without
        // reaching a terminal state is given up.
        if !final_state.is_terminal() {
            let attempts = progress_db::count_progress(&mut *tx, goal.id).await?;
            if attempts >= self.config.max_progress_count {
                tracing::warn!(
                    goal_id = %goal.id,
                    attempts,
                    "progress cap reached, giving up"
                );
                goal_db::set_goal_state(&mut *tx, goal.id, GoalState::GivenUp).await?;
                resolve_after_terminal(&mut tx, goal.id, finished_at).await?;
            }
        }

        // The tracking row must go before the commit: a crash in the gap
        // still looks like an attempt, never the reverse.
        tracking_db::delete_tracking(&self.store.tracking, &self.worker_id, goal.id).await?;

        tx.commit().await.context("failed to commit dispatch")?;
        notify::publish(&self.store.pool).await?;

        Ok(Dispatch::Progressed { goal_id: goal.id })
    }

    /// Record a handler's returned outcome inside the transaction and
    /// return the goal's new state.
    async fn record_outcome(
        &self,
        tx: &mut PgConnection,
        goal: &Goal,
        outcome: Outcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Result<GoalState> {
        match outcome {
            Outcome::AllDone => {
                progress_db::insert_progress(
                    &mut *tx, goal.id, started_at, finished_at, true, None, None,
                )
                .await?;
                goal_db::set_goal_state(&mut *tx, goal.id, GoalState::Achieved).await?;
                let woken = resolve_after_terminal(tx, goal.id, finished_at).await?;
                tracing::info!(
                    goal_id = %goal.id,
                    handler = %goal.handler,
                    dependents_woken = woken,
                    "goal achieved"
                );
                Ok(GoalState::Achieved)
            }
            Outcome::RetryMeLater {
                precondition_goals,
                precondition_date,
                message,
            } => {
                // Edge semantics: None keeps, Some([]) clears, Some(list)
                // replaces.
                if let Some(prerequisites) = &precondition_goals {
                    edge_db::replace_edges(&mut *tx, goal.id, prerequisites).await?;
                }

                progress_db::insert_progress(
                    &mut *tx,
                    goal.id,
                    started_at,
                    finished_at,
                    true,
                    message.as_deref(),
                    None,
                )
                .await?;

                let mut updated = goal.clone();
                if precondition_date.is_some() {
                    updated.precondition_date = precondition_date;
                }
                let prereq_states =
                    edge_db::get_prerequisite_states(&mut *tx, goal.id).await?;
                let target = next_state(&updated, &prereq_states, finished_at);

                goal_db::set_goal_state_and_gate(&mut *tx, goal.id, target, precondition_date)
                    .await?;
                if target.is_terminal() {
                    resolve_after_terminal(tx, goal.id, finished_at).await?;
                }
                tracing::info!(
                    goal_id = %goal.id,
                    handler = %goal.handler,
                    state = %target,
                    "goal deferred for retry"
                );
                Ok(target)
            }
        }
    }

    /// Record a recoverable handler failure inside the transaction.
    ///
    /// Errors from this function mean the transaction is unusable and the
    /// caller must take the corruption path.
    async fn record_failure(
        &self,
        tx: &mut PgConnection,
        goal: &Goal,
        err: &anyhow::Error,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Result<GoalState> {
        progress_db::insert_progress(
            &mut *tx,
            goal.id,
            started_at,
            finished_at,
            false,
            Some(&err.to_string()),
            Some(&format!("{err:?}")),
        )
        .await?;
        // Stays claimable so the goal is retried, up to the progress cap.
        goal_db::set_goal_state(&mut *tx, goal.id, GoalState::WaitingForWorker).await?;
        tracing::warn!(
            goal_id = %goal.id,
            handler = %goal.handler,
            error = %err,
            "handler failed, goal will be retried"
        );
        Ok(GoalState::WaitingForWorker)
    }

    /// Mark a goal corrupted on the tracking pool after the dispatch
    /// transaction had to be abandoned. The only place goal state is
    /// written outside the dispatch transaction.
    async fn corrupt_out_of_band(
        &self,
        goal: &Goal,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        err: &anyhow::Error,
    ) -> Result<()> {
        let mut side = self
            .store
            .tracking
            .begin()
            .await
            .context("failed to begin corruption transaction")?;

        goal_db::set_goal_state(&mut *side, goal.id, GoalState::Corrupted).await?;
        progress_db::insert_progress(
            &mut *side,
            goal.id,
            started_at,
            finished_at,
            false,
            Some("corrupted"),
            Some(&format!("{err:?}")),
        )
        .await?;
        resolve_after_terminal(&mut side, goal.id, finished_at).await?;
        tracking_db::delete_tracking(&mut *side, &self.worker_id, goal.id).await?;

        side.commit()
            .await
            .context("failed to commit corruption transaction")?;
        Ok(())
    }
}

//! The handler contract: application code that makes progress on a goal.
//!
//! Handlers are registered by stable string identifier at process start;
//! goal rows persist the identifier, not the function. A handler runs
//! inside the dispatcher's transaction and must be idempotent: it may be
//! invoked many times for the same goal, across retries and across
//! dynamic edge rewrites.

pub mod registry;

pub use registry::HandlerRegistry;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use goals_db::models::Goal;

/// What a handler invocation decided about its goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The goal is achieved; dependents may become ready.
    AllDone,
    /// Partial progress: come back later.
    RetryMeLater {
        /// `None` keeps the existing precondition edges untouched.
        /// `Some(vec![])` clears them. `Some(list)` replaces them.
        precondition_goals: Option<Vec<Uuid>>,
        /// When set, the goal is not pursued again before this time.
        precondition_date: Option<DateTime<Utc>>,
        /// Recorded on the progress entry.
        message: Option<String>,
    },
}

impl Outcome {
    /// Retry with the current edges and no date gate.
    pub fn retry_me_later() -> Self {
        Self::RetryMeLater {
            precondition_goals: None,
            precondition_date: None,
            message: None,
        }
    }

    /// Retry once every goal in `prerequisites` is achieved (replaces the
    /// goal's existing edges).
    pub fn retry_after_goals(prerequisites: Vec<Uuid>) -> Self {
        Self::RetryMeLater {
            precondition_goals: Some(prerequisites),
            precondition_date: None,
            message: None,
        }
    }

    /// Retry no earlier than `date`.
    pub fn retry_after_date(date: DateTime<Utc>) -> Self {
        Self::RetryMeLater {
            precondition_goals: None,
            precondition_date: Some(date),
            message: None,
        }
    }

    /// Attach a progress message to a retry outcome. No-op on [`Outcome::AllDone`].
    pub fn with_message(self, msg: impl Into<String>) -> Self {
        match self {
            Self::AllDone => Self::AllDone,
            Self::RetryMeLater {
                precondition_goals,
                precondition_date,
                ..
            } => Self::RetryMeLater {
                precondition_goals,
                precondition_date,
                message: Some(msg.into()),
            },
        }
    }
}

/// A routine that makes progress on goals of one handler identifier.
///
/// The connection is the dispatcher's open transaction: handlers may read
/// and write application tables, and may schedule further goals, all
/// atomically with the engine's own bookkeeping. Errors are recorded as
/// failed progress and the goal is retried up to the progress cap.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable identifier persisted on goal rows.
    fn name(&self) -> &str;

    /// Attempt progress on `goal`.
    async fn handle(&self, conn: &mut PgConnection, goal: &Goal) -> Result<Outcome>;
}

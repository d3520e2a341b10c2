use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// State of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    Blocked,
    WaitingForDate,
    WaitingForPreconditions,
    WaitingForWorker,
    Achieved,
    GivenUp,
    Corrupted,
    NotGoingToHappenSoon,
}

impl GoalState {
    /// Every state a goal can be in, in declaration order.
    pub const ALL: [GoalState; 8] = [
        Self::Blocked,
        Self::WaitingForDate,
        Self::WaitingForPreconditions,
        Self::WaitingForWorker,
        Self::Achieved,
        Self::GivenUp,
        Self::Corrupted,
        Self::NotGoingToHappenSoon,
    ];

    /// Terminal states never change again except by administrative retry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Achieved | Self::GivenUp | Self::Corrupted | Self::NotGoingToHappenSoon
        )
    }

    /// Terminal states that count as failure for dependents.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::GivenUp | Self::Corrupted | Self::NotGoingToHappenSoon
        )
    }
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Blocked => "blocked",
            Self::WaitingForDate => "waiting_for_date",
            Self::WaitingForPreconditions => "waiting_for_preconditions",
            Self::WaitingForWorker => "waiting_for_worker",
            Self::Achieved => "achieved",
            Self::GivenUp => "given_up",
            Self::Corrupted => "corrupted",
            Self::NotGoingToHappenSoon => "not_going_to_happen_soon",
        };
        f.write_str(s)
    }
}

impl FromStr for GoalState {
    type Err = GoalStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocked" => Ok(Self::Blocked),
            "waiting_for_date" => Ok(Self::WaitingForDate),
            "waiting_for_preconditions" => Ok(Self::WaitingForPreconditions),
            "waiting_for_worker" => Ok(Self::WaitingForWorker),
            "achieved" => Ok(Self::Achieved),
            "given_up" => Ok(Self::GivenUp),
            "corrupted" => Ok(Self::Corrupted),
            "not_going_to_happen_soon" => Ok(Self::NotGoingToHappenSoon),
            other => Err(GoalStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`GoalState`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid goal state: {0:?}")]
pub struct GoalStateParseError(pub String);

// ---------------------------------------------------------------------------

/// How a goal's prerequisites combine: all must be achieved, or any one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PreconditionsMode {
    All,
    Any,
}

impl fmt::Display for PreconditionsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

impl FromStr for PreconditionsMode {
    type Err = PreconditionsModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            other => Err(PreconditionsModeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PreconditionsMode`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid preconditions mode: {0:?}")]
pub struct PreconditionsModeParseError(pub String);

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A goal -- a persistent unit of work pursued by handler invocations.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Goal {
    pub id: Uuid,
    pub handler: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub state: GoalState,
    pub precondition_date: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub preconditions_mode: PreconditionsMode,
    pub precondition_failures_allowed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An edge in the precondition DAG: `dependent_id` waits on `prerequisite_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PreconditionEdge {
    pub dependent_id: Uuid,
    pub prerequisite_id: Uuid,
}

/// One handler invocation and its outcome. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Progress {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub message: Option<String>,
    pub traceback: Option<String>,
}

/// An in-flight attempt recorded outside the dispatch transaction.
///
/// A row surviving a worker's death is the evidence the killer guard uses
/// to detect goals that crash workers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkerTracking {
    pub worker_id: String,
    pub goal_id: Uuid,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

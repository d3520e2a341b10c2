//! The transition engine: a pure function from a goal row and its
//! prerequisites' states to the state the goal should be in.
//!
//! The engine never writes. The scheduler, dispatcher, and resolver call
//! [`next_state`] to derive the target state and apply the change inside
//! their own transaction.

use chrono::{DateTime, Utc};

use goals_db::models::{Goal, GoalState, PreconditionsMode};

/// Compute the state a goal should be in, given the states of its direct
/// prerequisites at `now`.
///
/// Priority order:
///
/// 1. Blocked and terminal states are left unchanged.
/// 2. A failed prerequisite propagates as not-going-to-happen-soon when the
///    goal does not allow precondition failures.
/// 3. Prerequisite satisfaction under the goal's mode (`all`: every
///    prerequisite achieved; `any`: at least one). Unsatisfied means
///    waiting-for-preconditions.
/// 4. A future precondition date gates the goal to waiting-for-date.
/// 5. Otherwise the goal is ready: waiting-for-worker.
pub fn next_state(goal: &Goal, prereq_states: &[GoalState], now: DateTime<Utc>) -> GoalState {
    if goal.state == GoalState::Blocked || goal.state.is_terminal() {
        return goal.state;
    }

    if !goal.precondition_failures_allowed && prereq_states.iter().any(|s| s.is_failure()) {
        return GoalState::NotGoingToHappenSoon;
    }

    let satisfied = match goal.preconditions_mode {
        PreconditionsMode::All => prereq_states.iter().all(|s| *s == GoalState::Achieved),
        PreconditionsMode::Any => {
            prereq_states.is_empty()
                || prereq_states.iter().any(|s| *s == GoalState::Achieved)
        }
    };
    if !satisfied {
        return GoalState::WaitingForPreconditions;
    }

    if let Some(date) = goal.precondition_date {
        if date > now {
            return GoalState::WaitingForDate;
        }
    }

    GoalState::WaitingForWorker
}

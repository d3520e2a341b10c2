//! Integration tests for the scheduling API and administrative operations.

use chrono::{TimeDelta, Utc};

use goals_core::config::EngineConfig;
use goals_core::schedule::{self, ScheduleRequest};
use goals_db::models::{GoalState, PreconditionsMode};
use goals_db::queries::{goals as goal_db, preconditions as edge_db};
use goals_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn schedule_with_no_preconditions_is_ready() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("send-email"))
        .await
        .expect("schedule should succeed");

    assert_eq!(goal.state, GoalState::WaitingForWorker);
    assert_eq!(goal.handler, "send-email");

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schedule_fills_default_deadline() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let before = Utc::now();
    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("noop"))
        .await
        .unwrap();

    let deadline = goal.deadline.expect("deadline should be filled in");
    let expected = before + TimeDelta::seconds(EngineConfig::DEFAULT_DEADLINE_SECONDS as i64);
    assert!(deadline >= expected - TimeDelta::minutes(1));
    assert!(deadline <= expected + TimeDelta::minutes(1));

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schedule_keeps_explicit_deadline() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let deadline = Utc::now() + TimeDelta::hours(2);
    let goal = schedule::schedule(
        &pool,
        &config,
        ScheduleRequest::new("noop").deadline(deadline),
    )
    .await
    .unwrap();

    // Postgres stores microseconds; compare with a small tolerance.
    let stored = goal.deadline.expect("deadline should be kept");
    assert!((stored - deadline).abs() < TimeDelta::milliseconds(1));

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schedule_with_pending_prerequisite_waits() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let a = schedule::schedule(&pool, &config, ScheduleRequest::new("a"))
        .await
        .unwrap();
    let b = schedule::schedule(
        &pool,
        &config,
        ScheduleRequest::new("b").precondition_goals(vec![a.id]),
    )
    .await
    .unwrap();

    assert_eq!(b.state, GoalState::WaitingForPreconditions);
    let prerequisites = edge_db::get_prerequisites(&pool, b.id).await.unwrap();
    assert_eq!(prerequisites, vec![a.id]);

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schedule_with_achieved_prerequisite_is_ready() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let a = schedule::schedule(&pool, &config, ScheduleRequest::new("a"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, a.id, GoalState::Achieved)
        .await
        .unwrap();

    let b = schedule::schedule(
        &pool,
        &config,
        ScheduleRequest::new("b").precondition_goals(vec![a.id]),
    )
    .await
    .unwrap();

    assert_eq!(b.state, GoalState::WaitingForWorker);

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schedule_future_date_waits_for_date() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let goal = schedule::schedule(
        &pool,
        &config,
        ScheduleRequest::new("noop").precondition_date(Utc::now() + TimeDelta::hours(1)),
    )
    .await
    .unwrap();

    assert_eq!(goal.state, GoalState::WaitingForDate);

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schedule_blocked_stays_blocked() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("noop").blocked())
        .await
        .unwrap();

    assert_eq!(goal.state, GoalState::Blocked);

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn schedule_failed_prerequisite_with_failures_fatal() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let a = schedule::schedule(&pool, &config, ScheduleRequest::new("a"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, a.id, GoalState::GivenUp)
        .await
        .unwrap();

    let b = schedule::schedule(
        &pool,
        &config,
        ScheduleRequest::new("b")
            .precondition_goals(vec![a.id])
            .precondition_failures_allowed(false),
    )
    .await
    .unwrap();

    assert_eq!(b.state, GoalState::NotGoingToHappenSoon);

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn scheduling_same_dag_twice_is_independent() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let a1 = schedule::schedule(&pool, &config, ScheduleRequest::new("a"))
        .await
        .unwrap();
    let b1 = schedule::schedule(
        &pool,
        &config,
        ScheduleRequest::new("b").precondition_goals(vec![a1.id]),
    )
    .await
    .unwrap();

    let a2 = schedule::schedule(&pool, &config, ScheduleRequest::new("a"))
        .await
        .unwrap();
    let b2 = schedule::schedule(
        &pool,
        &config,
        ScheduleRequest::new("b").precondition_goals(vec![a2.id]),
    )
    .await
    .unwrap();

    assert_ne!(a1.id, a2.id);
    assert_ne!(b1.id, b2.id);
    assert_eq!(
        edge_db::get_prerequisites(&pool, b1.id).await.unwrap(),
        vec![a1.id]
    );
    assert_eq!(
        edge_db::get_prerequisites(&pool, b2.id).await.unwrap(),
        vec![a2.id]
    );

    store.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Administrative operations
// -----------------------------------------------------------------------

#[tokio::test]
async fn block_and_unblock_roundtrip() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("noop"))
        .await
        .unwrap();

    let blocked = schedule::block(&pool, goal.id).await.unwrap();
    assert_eq!(blocked.state, GoalState::Blocked);

    let unblocked = schedule::unblock(&pool, goal.id).await.unwrap();
    assert_eq!(unblocked.state, GoalState::WaitingForWorker);

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn block_rejects_terminal_goal() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("noop"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, goal.id, GoalState::Achieved)
        .await
        .unwrap();

    let result = schedule::block(&pool, goal.id).await;
    assert!(result.is_err());

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unblock_rejects_non_blocked_goal() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("noop"))
        .await
        .unwrap();

    let result = schedule::unblock(&pool, goal.id).await;
    assert!(result.is_err());

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_revives_failed_goal() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("noop"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, goal.id, GoalState::GivenUp)
        .await
        .unwrap();

    let retried = schedule::retry(&pool, goal.id).await.unwrap();
    assert_eq!(retried.state, GoalState::WaitingForWorker);

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_rejects_achieved_goal() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("noop"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, goal.id, GoalState::Achieved)
        .await
        .unwrap();

    let result = schedule::retry(&pool, goal.id).await;
    assert!(result.is_err(), "achieved is sticky, not retryable");

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_respects_mode_any() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig::default();

    let a = schedule::schedule(&pool, &config, ScheduleRequest::new("a"))
        .await
        .unwrap();
    let b = schedule::schedule(&pool, &config, ScheduleRequest::new("b"))
        .await
        .unwrap();
    let c = schedule::schedule(
        &pool,
        &config,
        ScheduleRequest::new("c")
            .precondition_goals(vec![a.id, b.id])
            .preconditions_mode(PreconditionsMode::Any),
    )
    .await
    .unwrap();
    assert_eq!(c.state, GoalState::WaitingForPreconditions);

    goal_db::set_goal_state(&pool, c.id, GoalState::GivenUp)
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, a.id, GoalState::Achieved)
        .await
        .unwrap();

    let retried = schedule::retry(&pool, c.id).await.unwrap();
    assert_eq!(retried.state, GoalState::WaitingForWorker);

    store.close().await;
    drop_test_db(&db_name).await;
}

//! Integration tests for the retention sweeper.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use goals_core::config::EngineConfig;
use goals_core::retention;
use goals_core::schedule::{self, ScheduleRequest};
use goals_db::models::GoalState;
use goals_db::queries::{goals as goal_db, preconditions as edge_db};
use goals_test_utils::{create_test_db, drop_test_db};

const WEEK: Duration = Duration::from_secs(7 * 86_400);

fn week_config() -> EngineConfig {
    EngineConfig {
        retention: Some(WEEK),
        ..EngineConfig::default()
    }
}

async fn age_goal(pool: &PgPool, id: Uuid, days: i32) {
    sqlx::query("UPDATE goals SET updated_at = NOW() - ($1 || ' days')::interval WHERE id = $2")
        .bind(days.to_string())
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn sweep_deletes_old_achieved_goals() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = week_config();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("done"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, goal.id, GoalState::Achieved)
        .await
        .unwrap();
    age_goal(&pool, goal.id, 8).await;

    let deleted = retention::sweep(&pool, &config, Utc::now()).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(goal_db::get_goal(&pool, goal.id).await.unwrap().is_none());

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn sweep_keeps_recently_achieved_goals() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = week_config();

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("done"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, goal.id, GoalState::Achieved)
        .await
        .unwrap();
    age_goal(&pool, goal.id, 3).await;

    let deleted = retention::sweep(&pool, &config, Utc::now()).await.unwrap();
    assert_eq!(deleted, 0);
    assert!(goal_db::get_goal(&pool, goal.id).await.unwrap().is_some());

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn sweep_keeps_goals_with_live_referents() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = week_config();

    let achieved = schedule::schedule(&pool, &config, ScheduleRequest::new("done"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, achieved.id, GoalState::Achieved)
        .await
        .unwrap();

    // H still waits on its preconditions and references the old goal.
    let waiting = schedule::schedule(&pool, &config, ScheduleRequest::new("waiting"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, waiting.id, GoalState::WaitingForPreconditions)
        .await
        .unwrap();
    edge_db::insert_edge(&pool, waiting.id, achieved.id)
        .await
        .unwrap();

    age_goal(&pool, achieved.id, 8).await;

    let deleted = retention::sweep(&pool, &config, Utc::now()).await.unwrap();
    assert_eq!(deleted, 0);
    assert!(goal_db::get_goal(&pool, achieved.id).await.unwrap().is_some());

    // Once the referent is terminal, the next sweep reaps the goal.
    goal_db::set_goal_state(&pool, waiting.id, GoalState::Achieved)
        .await
        .unwrap();
    age_goal(&pool, achieved.id, 8).await;

    let deleted = retention::sweep(&pool, &config, Utc::now()).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(goal_db::get_goal(&pool, achieved.id).await.unwrap().is_none());

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn sweep_never_deletes_failed_goals() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = week_config();

    for failure in [
        GoalState::GivenUp,
        GoalState::Corrupted,
        GoalState::NotGoingToHappenSoon,
    ] {
        let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("failed"))
            .await
            .unwrap();
        goal_db::set_goal_state(&pool, goal.id, failure).await.unwrap();
        age_goal(&pool, goal.id, 30).await;
    }

    let deleted = retention::sweep(&pool, &config, Utc::now()).await.unwrap();
    assert_eq!(deleted, 0);

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn sweep_disabled_without_retention() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();
    let config = EngineConfig {
        retention: None,
        ..EngineConfig::default()
    };

    let goal = schedule::schedule(&pool, &config, ScheduleRequest::new("done"))
        .await
        .unwrap();
    goal_db::set_goal_state(&pool, goal.id, GoalState::Achieved)
        .await
        .unwrap();
    age_goal(&pool, goal.id, 365).await;

    let deleted = retention::sweep(&pool, &config, Utc::now()).await.unwrap();
    assert_eq!(deleted, 0);
    assert!(goal_db::get_goal(&pool, goal.id).await.unwrap().is_some());

    store.close().await;
    drop_test_db(&db_name).await;
}

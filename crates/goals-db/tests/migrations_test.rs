//! Migration smoke tests: the schema applies cleanly and contains the
//! expected tables and constraints.

use goals_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn migrations_create_all_tables() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename::text FROM pg_tables \
         WHERE schemaname = 'public' \
         ORDER BY tablename",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    for expected in [
        "goal_preconditions",
        "goal_progress",
        "goals",
        "worker_tracking",
    ] {
        assert!(names.contains(&expected), "missing table {expected}");
    }

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn goals_state_check_rejects_unknown_state() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();

    let result = sqlx::query("INSERT INTO goals (handler, state) VALUES ('x', 'daydreaming')")
        .execute(&pool)
        .await;
    assert!(result.is_err(), "CHECK constraint should reject the state");

    store.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn deleting_a_goal_cascades_to_satellites() {
    let (store, db_name) = create_test_db().await;
    let pool = store.pool.clone();

    let goal: (uuid::Uuid,) =
        sqlx::query_as("INSERT INTO goals (handler) VALUES ('x') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();
    let other: (uuid::Uuid,) =
        sqlx::query_as("INSERT INTO goals (handler) VALUES ('y') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();

    sqlx::query("INSERT INTO goal_preconditions (dependent_id, prerequisite_id) VALUES ($1, $2)")
        .bind(other.0)
        .bind(goal.0)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO goal_progress (goal_id, started_at, finished_at, success) \
         VALUES ($1, NOW(), NOW(), true)",
    )
    .bind(goal.0)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO worker_tracking (worker_id, goal_id, started_at) VALUES ('w', $1, NOW())",
    )
    .bind(goal.0)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("DELETE FROM goals WHERE id = $1")
        .bind(goal.0)
        .execute(&pool)
        .await
        .unwrap();

    let edges: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM goal_preconditions WHERE prerequisite_id = $1")
            .bind(goal.0)
            .fetch_one(&pool)
            .await
            .unwrap();
    let progress: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM goal_progress WHERE goal_id = $1")
        .bind(goal.0)
        .fetch_one(&pool)
        .await
        .unwrap();
    let tracking: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM worker_tracking WHERE goal_id = $1")
            .bind(goal.0)
            .fetch_one(&pool)
            .await
            .unwrap();

    assert_eq!(edges.0, 0);
    assert_eq!(progress.0, 0);
    assert_eq!(tracking.0, 0);

    store.close().await;
    drop_test_db(&db_name).await;
}

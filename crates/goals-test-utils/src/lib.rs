//! Shared test utilities for goals integration tests.
//!
//! Provides a PostgreSQL instance shared across tests; each test gets its
//! own database within the instance, handed back as a fully-connected
//! [`Store`] (dispatch pool plus tracking pool) with migrations applied.
//!
//! Two modes:
//! - **`GOALS_TEST_PG_URL`** set (nextest setup script): use the external
//!   container directly. No testcontainers overhead per process.
//! - **No env var** (`cargo test`): spin up a container via testcontainers,
//!   shared per binary through a `OnceCell`.

use sqlx::{Connection, Executor, PgConnection};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use goals_db::config::DbConfig;
use goals_db::store::{self, Store};

/// Shared container state: base config and optional container handle.
struct SharedPg {
    /// Config pointing at the server root (no database name in the path).
    base: DbConfig,
    /// Held to keep the container alive. `None` when using an external URL.
    _container: Option<ContainerAsync<Postgres>>,
}

/// Lazily-initialized shared PostgreSQL.
static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn init_shared_pg() -> SharedPg {
    // If a setup script already started a container, use that directly.
    if let Ok(url) = std::env::var("GOALS_TEST_PG_URL") {
        return SharedPg {
            base: DbConfig::new(url),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("18")
        .start()
        .await
        .expect("failed to start PostgreSQL container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base: DbConfig::new(format!("postgresql://postgres:postgres@{host}:{port}")),
        _container: Some(container),
    }
}

async fn shared_base() -> &'static DbConfig {
    &SHARED_PG.get_or_init(init_shared_pg).await.base
}

/// Open a single connection to the shared server's maintenance database.
async fn maintenance_conn() -> PgConnection {
    let url = shared_base().await.maintenance_url();
    PgConnection::connect(&url)
        .await
        .expect("failed to connect to maintenance database")
}

/// Create a temporary database with migrations applied.
///
/// Returns `(store, db_name)`. The store's two pools connect to a
/// uniquely-named database within the shared instance. Call
/// [`drop_test_db`] with the returned `db_name` when the test is done.
pub async fn create_test_db() -> (Store, String) {
    let mut conn = maintenance_conn().await;
    let db_name = format!("goals_test_{}", Uuid::new_v4().simple());
    let stmt = format!("CREATE DATABASE {db_name}");
    conn.execute(stmt.as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create temp database {db_name}: {e}"));
    let _ = conn.close().await;

    let config = DbConfig::new(shared_base().await.with_database(&db_name));
    let store = Store::connect(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to connect store to {db_name}: {e}"));

    store
        .migrate(store::default_migrations_path())
        .await
        .expect("migrations should succeed");

    (store, db_name)
}

/// Drop a temporary database.
///
/// Terminates existing connections and drops the database. Safe to call
/// even if the database was already dropped.
pub async fn drop_test_db(db_name: &str) {
    let mut conn = maintenance_conn().await;

    // Terminate existing connections first.
    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = conn.execute(terminate.as_str()).await;

    let stmt = format!("DROP DATABASE IF EXISTS {db_name}");
    let _ = conn.execute(stmt.as_str()).await;
    let _ = conn.close().await;
}

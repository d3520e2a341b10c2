//! The store: connection handling for the engine.
//!
//! Every worker owns two connections to the same database. The main pool
//! carries dispatch transactions; the tracking pool commits each statement
//! immediately, so attempt records written on it survive a worker crash
//! that rolls the dispatch transaction back. [`Store`] makes that pairing
//! explicit instead of leaving callers to wire two pools by hand.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// The engine's tables, in dependency order.
pub const ENGINE_TABLES: [&str; 4] = [
    "goals",
    "goal_preconditions",
    "goal_progress",
    "worker_tracking",
];

/// A worker's pair of database connections.
#[derive(Clone)]
pub struct Store {
    /// Transactional pool: dispatch, scheduling, resolution.
    pub pool: PgPool,
    /// Single autocommit connection for out-of-transaction tracking.
    pub tracking: PgPool,
}

impl Store {
    /// Connect both halves of the store to the configured database.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
            .with_context(|| {
                format!("failed to connect to database at {}", config.database_url)
            })?;

        let tracking = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
            .with_context(|| {
                format!(
                    "failed to connect tracking pool to database at {}",
                    config.database_url
                )
            })?;

        Ok(Self { pool, tracking })
    }

    /// Build a store from pools created elsewhere (embedders with their
    /// own pool tuning). The tracking pool must not share connections with
    /// code that opens transactions.
    pub fn from_pools(pool: PgPool, tracking: PgPool) -> Self {
        Self { pool, tracking }
    }

    /// Run all pending migrations from the given directory.
    ///
    /// Uses a runtime `Migrator` so that no running database is required
    /// at compile time (unlike the `sqlx::migrate!()` macro).
    pub async fn migrate(&self, migrations_dir: &Path) -> Result<()> {
        let migrator = sqlx::migrate::Migrator::new(migrations_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to load migrations from {}",
                    migrations_dir.display()
                )
            })?;

        migrator
            .run(&self.pool)
            .await
            .context("failed to run database migrations")?;

        info!("migrations applied successfully");
        Ok(())
    }

    /// Row counts for the engine's own tables.
    ///
    /// Useful for the `goals db-init` success message.
    pub async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(ENGINE_TABLES.len());
        for table in ENGINE_TABLES {
            // Table names come from the compile-time list above.
            let query = format!("SELECT COUNT(*) FROM {table}");
            let count: (i64,) = sqlx::query_as(&query)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("failed to count rows in {table}"))?;
            counts.push((table, count.0));
        }
        Ok(counts)
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.pool.close().await;
        self.tracking.close().await;
    }
}

/// Ensure the target database exists, creating it if necessary.
///
/// Opens a single connection to the `postgres` maintenance database and
/// issues `CREATE DATABASE <name>` when the target database is absent.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;

    let maintenance_url = config.maintenance_url();
    let mut conn = PgConnection::connect(&maintenance_url)
        .await
        .with_context(|| {
            format!("failed to connect to maintenance database at {maintenance_url}")
        })?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&mut conn)
            .await
            .context("failed to query pg_database")?;

    if exists {
        info!(db = db_name, "database already exists");
    } else {
        // Database names cannot be parameterised in CREATE DATABASE, so we
        // validate the name to avoid SQL injection, then use string formatting.
        if !db_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!("database name {:?} contains invalid characters", db_name);
        }
        let stmt = format!("CREATE DATABASE {db_name}");
        sqlx::query(&stmt)
            .execute(&mut conn)
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        info!(db = db_name, "database created");
    }

    let _ = conn.close().await;
    Ok(())
}

/// Return the default path to the migrations directory shipped with
/// `goals-db`.
///
/// At runtime this resolves relative to the `goals-db` crate's source tree
/// via the `CARGO_MANIFEST_DIR` compile-time env.  For installed binaries
/// (where the source tree is absent) the migrations are embedded at compile
/// time by the caller instead.
pub fn default_migrations_path() -> &'static Path {
    // CARGO_MANIFEST_DIR is set at *compile* time for the crate being
    // compiled, so this points at crates/goals-db/.
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
}

mod config;
mod show_cmd;
mod status_cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};

use goals_core::config::EngineConfig;
use goals_core::retention;
use goals_core::schedule;
use goals_db::store::{self, Store};

use config::GoalsConfig;

#[derive(Parser)]
#[command(name = "goals", about = "Database-backed goal engine administration")]
struct Cli {
    /// Database URL (overrides GOALS_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a goals config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/goals")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the goals database (create + migrate)
    DbInit,
    /// Show goal counts per state
    Status,
    /// Show one goal: row, prerequisites, recent progress
    Show {
        /// Goal ID to show
        goal_id: String,
    },
    /// Retry a failed goal (given_up, corrupted, not_going_to_happen_soon)
    Retry {
        /// Goal ID to retry
        goal_id: String,
    },
    /// Block a goal so no worker pursues it
    Block {
        /// Goal ID to block
        goal_id: String,
    },
    /// Unblock a goal and recompute its state
    Unblock {
        /// Goal ID to unblock
        goal_id: String,
    },
    /// Run one retention sweep now
    Sweep,
}

/// Execute the `goals init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `goals db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `goals db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = GoalsConfig::resolve(cli_db_url)?;

    println!("Initializing goals database...");

    // 1. Create the database if it does not exist.
    store::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect the store and run migrations.
    let db_store = Store::connect(&resolved.db_config).await?;
    db_store.migrate(store::default_migrations_path()).await?;

    // 3. Print success with table counts.
    let counts = db_store.table_counts().await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 4. Clean shutdown.
    db_store.close().await;

    println!("goals db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Status => {
            let resolved = GoalsConfig::resolve(cli.database_url.as_deref())?;
            let db_store = Store::connect(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_store.pool).await;
            db_store.close().await;
            result?;
        }
        Commands::Show { goal_id } => {
            let resolved = GoalsConfig::resolve(cli.database_url.as_deref())?;
            let db_store = Store::connect(&resolved.db_config).await?;
            let result = show_cmd::run_show(&db_store.pool, &goal_id).await;
            db_store.close().await;
            result?;
        }
        Commands::Retry { goal_id } => {
            let resolved = GoalsConfig::resolve(cli.database_url.as_deref())?;
            let db_store = Store::connect(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&goal_id)
                .with_context(|| format!("invalid goal ID: {goal_id}"))?;
            let result = schedule::retry(&db_store.pool, id).await;
            db_store.close().await;
            let goal = result?;
            println!("Goal {goal_id} retried; state is now {}.", goal.state);
        }
        Commands::Block { goal_id } => {
            let resolved = GoalsConfig::resolve(cli.database_url.as_deref())?;
            let db_store = Store::connect(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&goal_id)
                .with_context(|| format!("invalid goal ID: {goal_id}"))?;
            let result = schedule::block(&db_store.pool, id).await;
            db_store.close().await;
            result?;
            println!("Goal {goal_id} blocked.");
        }
        Commands::Unblock { goal_id } => {
            let resolved = GoalsConfig::resolve(cli.database_url.as_deref())?;
            let db_store = Store::connect(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&goal_id)
                .with_context(|| format!("invalid goal ID: {goal_id}"))?;
            let result = schedule::unblock(&db_store.pool, id).await;
            db_store.close().await;
            let goal = result?;
            println!("Goal {goal_id} unblocked; state is now {}.", goal.state);
        }
        Commands::Sweep => {
            let resolved = GoalsConfig::resolve(cli.database_url.as_deref())?;
            let db_store = Store::connect(&resolved.db_config).await?;
            let engine_config = EngineConfig::from_env()?;
            let result = retention::sweep(&db_store.pool, &engine_config, chrono::Utc::now()).await;
            db_store.close().await;
            let deleted = result?;
            println!("Retention sweep deleted {deleted} goals.");
        }
    }

    Ok(())
}

//! Wake-up channel over PostgreSQL LISTEN/NOTIFY.
//!
//! Notifications are a latency optimization only: the payload is ignored
//! and delivery is best-effort. Correctness rests on polling plus
//! `SKIP LOCKED`.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgListener;
use sqlx::PgPool;

/// The single logical channel all workers share.
pub const CHANNEL: &str = "goals";

/// Publish one wake-up on the shared channel.
pub async fn publish(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT pg_notify($1, '')")
        .bind(CHANNEL)
        .execute(pool)
        .await
        .context("failed to publish goals notification")?;
    Ok(())
}

/// A subscription to the shared channel, held by blocking workers.
pub struct GoalListener {
    listener: PgListener,
}

impl GoalListener {
    /// Connect a listener and subscribe to the channel.
    pub async fn connect(pool: &PgPool) -> Result<Self> {
        let mut listener = PgListener::connect_with(pool)
            .await
            .context("failed to connect goals listener")?;
        listener
            .listen(CHANNEL)
            .await
            .context("failed to LISTEN on goals channel")?;
        Ok(Self { listener })
    }

    /// Wait for a notification, up to `timeout`.
    ///
    /// Returns `true` when a notification arrived, `false` on timeout. A
    /// lost connection counts as a wake-up: the caller re-polls the queue,
    /// which is the safe reaction to missed notifications.
    pub async fn wait(&mut self, timeout: Duration) -> bool {
        tokio::select! {
            result = self.listener.try_recv() => match result {
                Ok(Some(_notification)) => true,
                // None means the connection dropped; try_recv reconnects on
                // the next call. Treat as a wake-up so the worker re-polls.
                Ok(None) => true,
                Err(err) => {
                    tracing::warn!(error = %err, "goals listener receive failed");
                    true
                }
            },
            _ = tokio::time::sleep(timeout) => false,
        }
    }
}

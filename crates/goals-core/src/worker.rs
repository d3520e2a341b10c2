//! Worker loops around the dispatcher.
//!
//! The busy worker polls with a bounded sleep and is the variant that runs
//! the retention sweeper. The blocking worker parks on the notification
//! channel instead of sleeping. The threaded worker spawns several logical
//! workers in one process, each with its own deadline horizon tier.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use goals_db::store::Store;

use crate::config::EngineConfig;
use crate::dispatch::{generate_worker_id, Dispatch, Dispatcher};
use crate::guard;
use crate::handler::HandlerRegistry;
use crate::notify::GoalListener;
use crate::retention;

/// How long the busy worker sleeps when the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_secs(1);
/// How long the blocking worker waits for a notification before re-polling.
const NOTIFY_WAIT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Option parsing
// ---------------------------------------------------------------------------

/// A deadline horizon argument: `<int>(s|m|h|d)` or `none`.
///
/// `none` disables horizon filtering; `0s` claims only overdue goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HorizonSpec(pub Option<Duration>);

impl FromStr for HorizonSpec {
    type Err = HorizonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Self(None));
        }
        let (number, unit) = s.split_at(s.len().saturating_sub(1));
        let value: u64 = number
            .parse()
            .map_err(|_| HorizonParseError(s.to_owned()))?;
        let seconds = match unit {
            "s" => value,
            "m" => value * 60,
            "h" => value * 3600,
            "d" => value * 86_400,
            _ => return Err(HorizonParseError(s.to_owned())),
        };
        Ok(Self(Some(Duration::from_secs(seconds))))
    }
}

impl fmt::Display for HorizonSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("none"),
            Some(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

/// Error returned when parsing an invalid [`HorizonSpec`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid horizon (expected <int>(s|m|h|d) or `none`): {0:?}")]
pub struct HorizonParseError(pub String);

/// One tier of a threaded worker: `N` logical workers sharing a horizon.
///
/// Parsed from `"N"` (no horizon) or `"N:Δ"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTier {
    pub count: usize,
    pub horizon: Option<Duration>,
}

impl FromStr for WorkerTier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count_str, horizon) = match s.split_once(':') {
            None => (s, None),
            Some((count_str, horizon_str)) => {
                let spec: HorizonSpec = horizon_str
                    .parse()
                    .map_err(|_| TierParseError(s.to_owned()))?;
                (count_str, spec.0)
            }
        };
        let count: usize = count_str.parse().map_err(|_| TierParseError(s.to_owned()))?;
        if count == 0 {
            return Err(TierParseError(s.to_owned()));
        }
        Ok(Self { count, horizon })
    }
}

/// Error returned when parsing an invalid [`WorkerTier`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid worker tier (expected N or N:<horizon>): {0:?}")]
pub struct TierParseError(pub String);

/// Per-process worker limits.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Exit after this many progressions, bounding the damage of slow
    /// leaks in handlers. `None` runs until cancelled.
    pub max_progress_count: Option<u64>,
    /// Address-space cap applied at startup (overrides the engine config).
    pub memory_limit_mib: Option<u64>,
    /// Deadline horizon for this worker.
    pub horizon: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Memory cap
// ---------------------------------------------------------------------------

/// Cap the process address space. The OS kills allocation beyond the cap,
/// which the killer guard then attributes to the goal that was running.
#[cfg(unix)]
pub fn apply_memory_limit(mib: u64) -> Result<()> {
    let bytes = mib * 1024 * 1024;
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("failed to set memory limit of {mib} MiB"));
    }
    tracing::info!(limit_mib = mib, "memory limit applied");
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_memory_limit(mib: u64) -> Result<()> {
    tracing::warn!(
        limit_mib = mib,
        "memory limits are not supported on this platform"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Worker loops
// ---------------------------------------------------------------------------

fn startup(config: &EngineConfig, options: &WorkerOptions) -> Result<()> {
    if let Some(mib) = options.memory_limit_mib.or(config.memory_limit_mib) {
        apply_memory_limit(mib)?;
    }
    Ok(())
}

/// Run the busy-wait worker until cancelled or the progress limit is hit.
///
/// This is the only variant that runs the retention sweeper; every
/// deployment needs at least one busy worker.
///
/// Returns the number of progressions made.
pub async fn run_busy_worker(
    store: Store,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    options: WorkerOptions,
    cancel: CancellationToken,
) -> Result<u64> {
    startup(&config, &options)?;
    guard::reap_killer_goals(&store.tracking, config.killer_threshold).await?;

    let dispatcher = Dispatcher::new(
        store.clone(),
        generate_worker_id(),
        registry,
        config.clone(),
        options.horizon,
    );
    tracing::info!(worker_id = %dispatcher.worker_id(), "busy worker started");

    let mut progressed = 0u64;
    let mut last_sweep = tokio::time::Instant::now();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if last_sweep.elapsed() >= retention::SWEEP_INTERVAL {
            if let Err(err) = retention::sweep(&store.pool, &config, chrono::Utc::now()).await {
                tracing::error!(error = %err, "retention sweep failed");
            }
            last_sweep = tokio::time::Instant::now();
        }

        match dispatcher.dispatch_one().await {
            Ok(Dispatch::Progressed { .. }) => {
                progressed += 1;
                if options
                    .max_progress_count
                    .is_some_and(|max| progressed >= max)
                {
                    tracing::info!(progressed, "progress limit reached, worker exiting");
                    break;
                }
            }
            Ok(Dispatch::Idle) => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "dispatch iteration failed");
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }

    Ok(progressed)
}

/// Run the blocking worker: park on the notification channel when idle.
///
/// Wakes on a publish or on the wait timeout; either way the next step is
/// a fresh claim attempt, so lost notifications only cost latency.
pub async fn run_blocking_worker(
    store: Store,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    options: WorkerOptions,
    cancel: CancellationToken,
) -> Result<u64> {
    startup(&config, &options)?;
    guard::reap_killer_goals(&store.tracking, config.killer_threshold).await?;

    let mut listener = GoalListener::connect(&store.pool).await?;
    let dispatcher = Dispatcher::new(
        store,
        generate_worker_id(),
        registry,
        config,
        options.horizon,
    );
    tracing::info!(worker_id = %dispatcher.worker_id(), "blocking worker started");
    let mut progressed = 0u64;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match dispatcher.dispatch_one().await {
            Ok(Dispatch::Progressed { .. }) => {
                progressed += 1;
                if options
                    .max_progress_count
                    .is_some_and(|max| progressed >= max)
                {
                    tracing::info!(progressed, "progress limit reached, worker exiting");
                    break;
                }
            }
            Ok(Dispatch::Idle) => {
                tokio::select! {
                    _ = listener.wait(NOTIFY_WAIT) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "dispatch iteration failed");
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }

    Ok(progressed)
}

/// Run `tiers` of blocking workers in one process, each logical worker with
/// its tier's deadline horizon. Horizon tiers let urgent goals preempt bulk
/// workloads by dedicating workers to short horizons.
///
/// Returns the total number of progressions across all workers.
pub async fn run_threaded_worker(
    store: Store,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    options: WorkerOptions,
    tiers: Vec<WorkerTier>,
    cancel: CancellationToken,
) -> Result<u64> {
    startup(&config, &options)?;
    guard::reap_killer_goals(&store.tracking, config.killer_threshold).await?;

    let mut joins = Vec::new();
    for tier in &tiers {
        for _ in 0..tier.count {
            let worker_options = WorkerOptions {
                max_progress_count: options.max_progress_count,
                // Applied once above for the whole process.
                memory_limit_mib: None,
                horizon: tier.horizon,
            };
            joins.push(tokio::spawn(run_blocking_worker(
                store.clone(),
                Arc::clone(&registry),
                config.clone(),
                worker_options,
                cancel.clone(),
            )));
        }
    }

    let mut total = 0u64;
    for join in joins {
        total += join.await.context("worker task panicked")??;
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_parses_units() {
        assert_eq!(
            "30s".parse::<HorizonSpec>().unwrap(),
            HorizonSpec(Some(Duration::from_secs(30)))
        );
        assert_eq!(
            "5m".parse::<HorizonSpec>().unwrap(),
            HorizonSpec(Some(Duration::from_secs(300)))
        );
        assert_eq!(
            "2h".parse::<HorizonSpec>().unwrap(),
            HorizonSpec(Some(Duration::from_secs(7200)))
        );
        assert_eq!(
            "1d".parse::<HorizonSpec>().unwrap(),
            HorizonSpec(Some(Duration::from_secs(86_400)))
        );
    }

    #[test]
    fn horizon_zero_means_overdue_only() {
        assert_eq!(
            "0s".parse::<HorizonSpec>().unwrap(),
            HorizonSpec(Some(Duration::ZERO))
        );
    }

    #[test]
    fn horizon_none_disables_filtering() {
        assert_eq!("none".parse::<HorizonSpec>().unwrap(), HorizonSpec(None));
        assert_eq!("NONE".parse::<HorizonSpec>().unwrap(), HorizonSpec(None));
    }

    #[test]
    fn horizon_rejects_garbage() {
        assert!("".parse::<HorizonSpec>().is_err());
        assert!("5".parse::<HorizonSpec>().is_err());
        assert!("5w".parse::<HorizonSpec>().is_err());
        assert!("s".parse::<HorizonSpec>().is_err());
        assert!("-1s".parse::<HorizonSpec>().is_err());
    }

    #[test]
    fn horizon_display_roundtrip() {
        for spec in ["none", "30s", "0s"] {
            let parsed: HorizonSpec = spec.parse().unwrap();
            assert_eq!(parsed.to_string(), spec);
        }
    }

    #[test]
    fn tier_without_horizon() {
        let tier: WorkerTier = "4".parse().unwrap();
        assert_eq!(
            tier,
            WorkerTier {
                count: 4,
                horizon: None
            }
        );
    }

    #[test]
    fn tier_with_horizon() {
        let tier: WorkerTier = "2:1h".parse().unwrap();
        assert_eq!(
            tier,
            WorkerTier {
                count: 2,
                horizon: Some(Duration::from_secs(3600))
            }
        );
    }

    #[test]
    fn tier_with_none_horizon() {
        let tier: WorkerTier = "3:none".parse().unwrap();
        assert_eq!(
            tier,
            WorkerTier {
                count: 3,
                horizon: None
            }
        );
    }

    #[test]
    fn tier_rejects_garbage() {
        assert!("0".parse::<WorkerTier>().is_err());
        assert!("x:1h".parse::<WorkerTier>().is_err());
        assert!("2:bogus".parse::<WorkerTier>().is_err());
        assert!("".parse::<WorkerTier>().is_err());
    }
}

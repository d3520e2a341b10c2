//! Engine configuration from `GOALS_*` environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Tunables for dispatch, retry, crash detection, and retention.
///
/// Read once at worker startup; the engine keeps no other process-global
/// state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A goal with this many progress entries is forced into given-up.
    pub max_progress_count: i64,
    /// Achieved goals older than this are eligible for deletion.
    /// `None` disables the retention sweeper.
    pub retention: Option<Duration>,
    /// Deadline assigned to goals scheduled without an explicit one.
    pub default_deadline: Duration,
    /// Per-worker address-space cap, applied via setrlimit on Unix.
    pub memory_limit_mib: Option<u64>,
    /// Per-invocation wall-time cap for handlers.
    pub time_limit: Option<Duration>,
    /// Tracking rows per goal before the killer guard marks it corrupted.
    pub killer_threshold: i64,
}

impl EngineConfig {
    pub const DEFAULT_MAX_PROGRESS_COUNT: i64 = 100;
    pub const DEFAULT_RETENTION_SECONDS: u64 = 604_800;
    pub const DEFAULT_DEADLINE_SECONDS: u64 = 604_800;
    pub const DEFAULT_KILLER_THRESHOLD: i64 = 3;

    /// Build a config from the environment.
    ///
    /// Variables: `GOALS_MAX_PROGRESS_COUNT`, `GOALS_RETENTION_SECONDS`
    /// (integer or `none`), `GOALS_DEFAULT_DEADLINE_SECONDS`,
    /// `GOALS_MEMORY_LIMIT_MIB`, `GOALS_TIME_LIMIT_SECONDS`,
    /// `GOALS_KILLER_THRESHOLD`.
    pub fn from_env() -> Result<Self> {
        let max_progress_count = match env::var("GOALS_MAX_PROGRESS_COUNT") {
            Ok(v) => v
                .parse::<i64>()
                .context("GOALS_MAX_PROGRESS_COUNT is not an integer")?,
            Err(_) => Self::DEFAULT_MAX_PROGRESS_COUNT,
        };

        let retention = match env::var("GOALS_RETENTION_SECONDS") {
            Ok(v) if v.eq_ignore_ascii_case("none") => None,
            Ok(v) => Some(Duration::from_secs(
                v.parse::<u64>()
                    .context("GOALS_RETENTION_SECONDS is not an integer or `none`")?,
            )),
            Err(_) => Some(Duration::from_secs(Self::DEFAULT_RETENTION_SECONDS)),
        };

        let default_deadline = match env::var("GOALS_DEFAULT_DEADLINE_SECONDS") {
            Ok(v) => Duration::from_secs(
                v.parse::<u64>()
                    .context("GOALS_DEFAULT_DEADLINE_SECONDS is not an integer")?,
            ),
            Err(_) => Duration::from_secs(Self::DEFAULT_DEADLINE_SECONDS),
        };

        let memory_limit_mib = match env::var("GOALS_MEMORY_LIMIT_MIB") {
            Ok(v) => Some(
                v.parse::<u64>()
                    .context("GOALS_MEMORY_LIMIT_MIB is not an integer")?,
            ),
            Err(_) => None,
        };

        let time_limit = match env::var("GOALS_TIME_LIMIT_SECONDS") {
            Ok(v) => Some(Duration::from_secs(
                v.parse::<u64>()
                    .context("GOALS_TIME_LIMIT_SECONDS is not an integer")?,
            )),
            Err(_) => None,
        };

        let killer_threshold = match env::var("GOALS_KILLER_THRESHOLD") {
            Ok(v) => v
                .parse::<i64>()
                .context("GOALS_KILLER_THRESHOLD is not an integer")?,
            Err(_) => Self::DEFAULT_KILLER_THRESHOLD,
        };

        Ok(Self {
            max_progress_count,
            retention,
            default_deadline,
            memory_limit_mib,
            time_limit,
            killer_threshold,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_progress_count: Self::DEFAULT_MAX_PROGRESS_COUNT,
            retention: Some(Duration::from_secs(Self::DEFAULT_RETENTION_SECONDS)),
            default_deadline: Duration::from_secs(Self::DEFAULT_DEADLINE_SECONDS),
            memory_limit_mib: None,
            time_limit: None,
            killer_threshold: Self::DEFAULT_KILLER_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_progress_count, 100);
        assert_eq!(cfg.retention, Some(Duration::from_secs(604_800)));
        assert_eq!(cfg.default_deadline, Duration::from_secs(604_800));
        assert!(cfg.memory_limit_mib.is_none());
        assert!(cfg.time_limit.is_none());
        assert_eq!(cfg.killer_threshold, 3);
    }
}

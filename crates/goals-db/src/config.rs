use std::env;

/// Connection configuration for the store.
///
/// A single URL; the store derives every per-worker connection from it,
/// both the transactional pool and the autocommit tracking pool.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/goals";

    /// Build a config from the environment.
    ///
    /// Priority: `GOALS_DATABASE_URL` env var, then the compile-time default.
    pub fn from_env() -> Self {
        let database_url =
            env::var("GOALS_DATABASE_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// The URL split into `(scheme-and-authority, path, query-string)`.
    ///
    /// `postgresql://user@host:5432/goals?sslmode=require` splits into
    /// `("postgresql://user@host:5432", "/goals", "?sslmode=require")`.
    /// Path and query are empty when absent.
    fn split_url(&self) -> (&str, &str, &str) {
        let url = self.database_url.as_str();
        let (base, params) = match url.find(['?', '#']) {
            Some(pos) => url.split_at(pos),
            None => (url, ""),
        };
        let authority_start = base.find("://").map(|pos| pos + 3).unwrap_or(0);
        match base[authority_start..].find('/') {
            Some(slash) => {
                let (head, path) = base.split_at(authority_start + slash);
                (head, path, params)
            }
            None => (base, "", params),
        }
    }

    /// Extract the database name from the URL, ignoring any query string.
    ///
    /// Returns `None` when the URL has no path component.
    pub fn database_name(&self) -> Option<&str> {
        let (_, path, _) = self.split_url();
        let name = path.strip_prefix('/').unwrap_or(path);
        (!name.is_empty()).then_some(name)
    }

    /// Rewrite the URL to point at a sibling database on the same server,
    /// keeping credentials and query parameters intact.
    pub fn with_database(&self, name: &str) -> String {
        let (head, _, params) = self.split_url();
        format!("{head}/{name}{params}")
    }

    /// Return a URL pointing at the `postgres` maintenance database on the
    /// same server. Used to issue `CREATE DATABASE` when the target DB does
    /// not yet exist.
    pub fn maintenance_url(&self) -> String {
        self.with_database("postgres")
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

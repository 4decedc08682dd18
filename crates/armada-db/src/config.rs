//! Connection settings for the scheduler's PostgreSQL database.
//!
//! `DbConfig` owns the whole URL story: the resolution chain (explicit
//! flag, then environment, then config-file fallback, then the built-in
//! default), pool sizing, and the validation that turns a bad URL into a
//! readable error instead of a confusing pool timeout later.

use std::env;
use std::time::Duration;

use anyhow::{Result, bail};

/// Environment variable consulted by [`DbConfig::resolve`].
pub const DATABASE_URL_ENV: &str = "ARMADA_DATABASE_URL";

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Pool size. Dispatchers, workers, and the recovery loop all share
    /// one pool, so this should sit well above the dispatcher count.
    pub max_connections: u32,
    /// How long a caller may wait for a pooled connection.
    pub acquire_timeout: Duration,
}

impl DbConfig {
    /// URL used when nothing in the chain provides one.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/armada";

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    /// Resolve the URL through the chain: `explicit` (a CLI flag) wins,
    /// then `ARMADA_DATABASE_URL`, then `fallback` (the config file), then
    /// [`Self::DEFAULT_URL`].
    pub fn resolve(explicit: Option<&str>, fallback: Option<&str>) -> Self {
        let url = explicit
            .map(str::to_owned)
            .or_else(|| env::var(DATABASE_URL_ENV).ok())
            .or_else(|| fallback.map(str::to_owned))
            .unwrap_or_else(|| Self::DEFAULT_URL.to_owned());
        Self::new(url)
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Reject configurations the pool would otherwise fail on later, with
    /// worse error messages.
    pub fn validate(&self) -> Result<()> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            bail!(
                "database URL must use the postgres:// or postgresql:// scheme, got {:?}",
                self.database_url
            );
        }
        if self.database_name().is_none() {
            bail!("database URL {:?} names no database", self.database_url);
        }
        if self.max_connections == 0 {
            bail!("max_connections must be at least 1");
        }
        Ok(())
    }

    /// The name of the target database, with any query parameters stripped.
    ///
    /// Returns `None` when the URL has no database segment at all (e.g.
    /// `postgresql://localhost:5432`), which validation treats as an error.
    pub fn database_name(&self) -> Option<&str> {
        let tail = self.database_url.rsplit('/').next()?;
        let name = match tail.split_once('?') {
            Some((name, _params)) => name,
            None => tail,
        };
        // A "name" still containing host syntax means the URL had no
        // database segment.
        if name.is_empty() || name.contains(':') || name.contains('@') {
            return None;
        }
        Some(name)
    }

    /// URL of the server's `postgres` admin database, for issuing
    /// `CREATE DATABASE` before the target exists.
    pub fn admin_url(&self) -> String {
        match (self.database_name(), self.database_url.rfind('/')) {
            (Some(_), Some(idx)) => format!("{}/postgres", &self.database_url[..idx]),
            _ => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::resolve(None, None)
    }
}

//! Pool construction and schema migrations.
//!
//! Migrations are embedded at compile time via `sqlx::migrate!`, so an
//! installed `armada` binary needs no migrations directory on disk and the
//! schema a build applies is exactly the schema it was compiled against.
//! Database *creation* is deliberately not handled here -- that is a
//! provisioning concern owned by `armada db-init` in the CLI.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use crate::config::DbConfig;

/// The schema, embedded from `crates/armada-db/migrations/` at build time.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open a connection pool sized per the config.
///
/// Validates the config first so a malformed URL fails here, with a
/// message naming the problem, rather than as an opaque connect error.
pub async fn connect(config: &DbConfig) -> Result<PgPool> {
    config.validate()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("could not reach PostgreSQL at {}", config.database_url))?;

    Ok(pool)
}

/// Bring the connected database's schema up to date.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("schema migration failed")?;

    tracing::info!(
        migrations = MIGRATOR.iter().count(),
        "schema is up to date"
    );
    Ok(())
}

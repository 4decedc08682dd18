//! One-time provisioning for `armada db-init`: create the configured
//! database when it is absent, and summarize what the schema holds.

use anyhow::{Context, Result, bail};
use sqlx::{Connection, Executor, PgConnection, PgPool};

use armada_db::config::DbConfig;

/// `CREATE DATABASE` cannot be parameterised, so the name gets
/// interpolated; restrict it to identifier-safe characters first.
fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Create the database named by `config` if it does not exist yet.
/// Returns `true` when a database was actually created.
///
/// Uses a single short-lived connection to the server's admin database; no
/// pool is worth setting up for two statements.
pub async fn create_database_if_missing(config: &DbConfig) -> Result<bool> {
    let name = config.database_name().with_context(|| {
        format!(
            "cannot tell the database name from {:?}",
            config.database_url
        )
    })?;
    if !is_safe_identifier(name) {
        bail!("database name {name:?} is not a safe identifier");
    }

    let admin_url = config.admin_url();
    let mut conn = PgConnection::connect(&admin_url)
        .await
        .with_context(|| format!("could not reach the admin database at {admin_url}"))?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(&mut conn)
            .await
            .context("failed to look up pg_database")?;

    let created = if exists {
        false
    } else {
        conn.execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .with_context(|| format!("CREATE DATABASE {name} failed"))?;
        true
    };

    let _ = conn.close().await;
    Ok(created)
}

/// Row counts for the schema's two relations, for the db-init summary.
pub async fn schema_summary(pool: &PgPool) -> Result<(i64, i64)> {
    let tasks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
        .fetch_one(pool)
        .await
        .context("failed to count tasks")?;
    let instances: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM instances")
        .fetch_one(pool)
        .await
        .context("failed to count instances")?;
    Ok((tasks, instances))
}

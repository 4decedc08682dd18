//! PostgreSQL fixtures for armada's integration tests.
//!
//! All tests in a binary share one server -- a testcontainers instance, or
//! whatever `ARMADA_TEST_PG_URL` points at -- plus one long-lived admin
//! pool for database management. Each test then provisions a migrated,
//! throwaway database through [`TestDb`], so scheduler runs, lease races,
//! and store queries stay fully isolated from each other.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// One PostgreSQL server per test binary.
struct PgServer {
    base_url: String,
    admin: PgPool,
    /// Held to keep the container alive. `None` under `ARMADA_TEST_PG_URL`.
    _container: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<PgServer> = OnceCell::const_new();

async fn server() -> &'static PgServer {
    SERVER.get_or_init(boot_server).await
}

async fn boot_server() -> PgServer {
    let (base_url, container) = match std::env::var("ARMADA_TEST_PG_URL") {
        // A setup script (nextest, CI) already exported a running server.
        Ok(url) => (url, None),
        Err(_) => {
            let container = Postgres::default()
                .with_tag("18")
                .start()
                .await
                .expect("postgres container should start");
            let host = container.get_host().await.expect("container host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("container mapped port");
            (
                format!("postgresql://postgres:postgres@{host}:{port}"),
                Some(container),
            )
        }
    };

    let admin = PgPoolOptions::new()
        .max_connections(2)
        .connect(&format!("{base_url}/postgres"))
        .await
        .expect("admin connection should open");

    PgServer {
        base_url,
        admin,
        _container: container,
    }
}

/// A migrated, throwaway database.
///
/// Create one at the top of a test, run everything through `pool`, and
/// finish with [`TestDb::teardown`] to drop the database again.
pub struct TestDb {
    pub pool: PgPool,
    name: String,
}

impl TestDb {
    pub async fn new() -> Self {
        let server = server().await;
        let name = format!("armada_{}", Uuid::new_v4().simple());

        server
            .admin
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .unwrap_or_else(|e| panic!("creating test database {name} failed: {e}"));

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&format!("{}/{name}", server.base_url))
            .await
            .unwrap_or_else(|e| panic!("connecting to test database {name} failed: {e}"));

        armada_db::pool::MIGRATOR
            .run(&pool)
            .await
            .expect("migrations should apply");

        Self { pool, name }
    }

    /// Close the pool and drop the database.
    ///
    /// `WITH (FORCE)` disconnects stragglers, so a test that cancelled its
    /// scheduler mid-flight still tears down cleanly.
    pub async fn teardown(self) {
        self.pool.close().await;

        let server = server().await;
        let stmt = format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", self.name);
        if let Err(e) = server.admin.execute(stmt.as_str()).await {
            eprintln!("warning: failed to drop test database {}: {e}", self.name);
        }
    }
}

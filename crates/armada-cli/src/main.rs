mod config;
mod db_setup;
mod serve_cmd;
mod status_cmd;
mod task_cmds;

use clap::{Parser, Subcommand};

use armada_db::pool;

use config::ArmadaConfig;

#[derive(Parser)]
#[command(name = "armada", about = "Task scheduler for cloud instance fleets")]
struct Cli {
    /// Database URL (overrides ARMADA_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an armada config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/armada")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the armada database (creates it and runs migrations)
    DbInit,
    /// Run the scheduler until interrupted
    Serve {
        /// Total worker count across both priority classes
        #[arg(long)]
        workers: Option<usize>,
        /// Fraction of workers assigned to the high-priority queue
        #[arg(long)]
        high_ratio: Option<f64>,
        /// Dispatcher poll interval in seconds
        #[arg(long)]
        poll_secs: Option<u64>,
        /// Task lease TTL in seconds
        #[arg(long)]
        lease_ttl_secs: Option<u64>,
    },
    /// Show task counts by status and the most recent tasks
    Status,
    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Run the stale-lease recovery scan once
    Recover,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Show a task's full state, including logs and errors
    Show {
        /// Task ID
        task_id: i64,
    },
    /// Cancel a pending or running task
    Cancel {
        /// Task ID
        task_id: i64,
    },
    /// Reset a failed task to pending with a fresh attempt budget
    Retry {
        /// Task ID
        task_id: i64,
    },
}

/// Execute the `armada init` command: write config file.
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
            max_connections: None,
        },
        scheduler: config::SchedulerSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `armada db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `armada db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = ArmadaConfig::resolve(cli_db_url)?;

    println!("Initializing armada database...");

    if db_setup::create_database_if_missing(&resolved.db_config).await? {
        if let Some(name) = resolved.db_config.database_name() {
            println!("Created database {name}.");
        }
    }

    let db_pool = pool::connect(&resolved.db_config).await?;
    pool::migrate(&db_pool).await?;

    let (task_count, instance_count) = db_setup::schema_summary(&db_pool).await?;
    println!("Schema is up to date: {task_count} task(s), {instance_count} instance(s) on record.");

    db_pool.close().await;
    println!("armada db-init complete.");
    Ok(())
}

/// Execute the `armada recover` command: one-shot stale-lease scan.
async fn cmd_recover(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = ArmadaConfig::resolve(cli_db_url)?;
    let db_pool = pool::connect(&resolved.db_config).await?;

    let count = armada_db::queries::tasks::recover_stale(&db_pool).await?;
    println!("Reset {count} stale task(s) to pending.");

    db_pool.close().await;
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

    let result = match cli.command {
        Commands::Init { db_url, force } => cmd_init(&db_url, force),
        Commands::DbInit => cmd_db_init(cli.database_url.as_deref()).await,
        Commands::Serve {
            workers,
            high_ratio,
            poll_secs,
            lease_ttl_secs,
        } => {
            serve_cmd::run_serve(
                cli.database_url.as_deref(),
                serve_cmd::ServeOverrides {
                    workers,
                    high_ratio,
                    poll_secs,
                    lease_ttl_secs,
                },
            )
            .await
        }
        Commands::Status => status_cmd::run_status(cli.database_url.as_deref()).await,
        Commands::Task { command } => match command {
            TaskCommands::Show { task_id } => {
                task_cmds::run_show(cli.database_url.as_deref(), task_id).await
            }
            TaskCommands::Cancel { task_id } => {
                task_cmds::run_cancel(cli.database_url.as_deref(), task_id).await
            }
            TaskCommands::Retry { task_id } => {
                task_cmds::run_retry(cli.database_url.as_deref(), task_id).await
            }
        },
        Commands::Recover => cmd_recover(cli.database_url.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}

//! `armada status` command: task counts by status and the recent task list.

use anyhow::Result;

use armada_db::pool;
use armada_db::queries::tasks as task_db;

use crate::config::ArmadaConfig;

pub async fn run_status(cli_db_url: Option<&str>) -> Result<()> {
    let resolved = ArmadaConfig::resolve(cli_db_url)?;
    let db_pool = pool::connect(&resolved.db_config).await?;

    let counts = task_db::count_by_status(&db_pool).await?;
    if counts.is_empty() {
        println!("No tasks.");
    } else {
        println!("Tasks by status:");
        for (status, priority, count) in &counts {
            println!("  {:<10} {:<5} {count}", status.to_string(), priority.to_string());
        }
    }
    println!();

    let tasks = task_db::list_recent_tasks(&db_pool, 20).await?;
    println!("Recent tasks:");
    for task in &tasks {
        let status_icon = match task.status.to_string().as_str() {
            "pending" => ".",
            "running" => "*",
            "completed" => "+",
            "failed" => "!",
            "terminated" => "X",
            _ => " ",
        };
        println!(
            "  [{}] #{} {} {} (attempt {}/{})",
            status_icon, task.id, task.action, task.status, task.attempts, task.max_attempts
        );
    }

    db_pool.close().await;
    Ok(())
}

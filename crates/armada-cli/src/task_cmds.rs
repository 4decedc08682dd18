//! `armada task` subcommands: show, cancel, retry.

use anyhow::{Context, Result};

use armada_db::pool;
use armada_db::queries::tasks as task_db;

use crate::config::ArmadaConfig;

pub async fn run_show(cli_db_url: Option<&str>, task_id: i64) -> Result<()> {
    let resolved = ArmadaConfig::resolve(cli_db_url)?;
    let db_pool = pool::connect(&resolved.db_config).await?;

    let task = task_db::get_task(&db_pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task #{}", task.id);
    println!("  action:       {}", task.action);
    println!("  priority:     {}", task.priority);
    println!("  status:       {}", task.status);
    println!("  owner/project: {}/{}", task.owner_id, task.project_id);
    if task.instance_id != 0 {
        println!("  instance:     {}", task.instance_id);
    }
    println!("  attempts:     {}/{}", task.attempts, task.max_attempts);
    if let Some(holder) = &task.lock_holder {
        println!("  lock holder:  {holder}");
    }
    if let Some(expires) = task.lock_expires_at {
        println!("  lock expires: {}", expires.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  created:      {}", task.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  payload:      {}", task.payload);
    if !task.error.is_empty() {
        println!("  error:        {}", task.error);
    }
    if !task.result.is_empty() {
        println!("  result:       {}", task.result);
    }
    if !task.logs.is_empty() {
        println!("  logs:");
        for line in task.logs.lines() {
            println!("    {line}");
        }
    }

    db_pool.close().await;
    Ok(())
}

pub async fn run_cancel(cli_db_url: Option<&str>, task_id: i64) -> Result<()> {
    let resolved = ArmadaConfig::resolve(cli_db_url)?;
    let db_pool = pool::connect(&resolved.db_config).await?;

    task_db::terminate_task(&db_pool, task_id).await?;
    println!("Task {task_id} terminated.");

    db_pool.close().await;
    Ok(())
}

pub async fn run_retry(cli_db_url: Option<&str>, task_id: i64) -> Result<()> {
    let resolved = ArmadaConfig::resolve(cli_db_url)?;
    let db_pool = pool::connect(&resolved.db_config).await?;

    task_db::retry_failed(&db_pool, task_id).await?;
    println!("Task {task_id} reset to pending.");

    db_pool.close().await;
    Ok(())
}

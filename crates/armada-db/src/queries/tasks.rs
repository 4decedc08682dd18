//! Database query functions for the `tasks` table: insertion, the
//! schedulable-task query, lease arbitration, attempt counting, status
//! transitions, and stale-lease recovery.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{NewTask, Task, TaskPriority, TaskStatus};

/// Error returned by [`try_acquire_lease`].
///
/// Contention (`NotAcquired`) is an expected outcome, not a fault: callers
/// drop the task silently because another worker owns it.
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("task {0} not found")]
    NotFound(i64),
    #[error("task {0} is leased by another worker or no longer schedulable")]
    NotAcquired(i64),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Insert a new task row in `pending` with zero attempts and no lease.
/// Returns the inserted task with server-generated defaults.
pub async fn insert_task(pool: &PgPool, new: &NewTask) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (owner_id, project_id, instance_id, action, priority, payload, \
                            max_attempts, webhook_url) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.project_id)
    .bind(new.instance_id)
    .bind(new.action)
    .bind(new.priority)
    .bind(&new.payload)
    .bind(new.max_attempts)
    .bind(&new.webhook_url)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Insert a batch of tasks atomically (all or nothing).
pub async fn insert_task_batch(pool: &PgPool, batch: &[NewTask]) -> Result<Vec<Task>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let mut inserted = Vec::with_capacity(batch.len());
    for new in batch {
        let task = sqlx::query_as::<_, Task>(
            "INSERT INTO tasks (owner_id, project_id, instance_id, action, priority, payload, \
                                max_attempts, webhook_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING *",
        )
        .bind(new.owner_id)
        .bind(new.project_id)
        .bind(new.instance_id)
        .bind(new.action)
        .bind(new.priority)
        .bind(&new.payload)
        .bind(new.max_attempts)
        .bind(&new.webhook_url)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert task in batch")?;
        inserted.push(task);
    }

    tx.commit().await.context("failed to commit task batch")?;
    Ok(inserted)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List the most recently created tasks (operator surface).
pub async fn list_recent_tasks(pool: &PgPool, limit: i64) -> Result<Vec<Task>> {
    let tasks =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(pool)
            .await
            .context("failed to list tasks")?;

    Ok(tasks)
}

/// Count tasks grouped by (status, priority) for the status report.
pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(TaskStatus, TaskPriority, i64)>> {
    let rows: Vec<(TaskStatus, TaskPriority, i64)> = sqlx::query_as(
        "SELECT status, priority, COUNT(*) \
         FROM tasks \
         GROUP BY status, priority \
         ORDER BY status, priority",
    )
    .fetch_all(pool)
    .await
    .context("failed to count tasks by status")?;

    Ok(rows)
}

/// Return up to `limit` tasks ready for dispatch in the given priority
/// class, oldest first.
///
/// A task is schedulable when it is `pending`, holds no live lease, and has
/// attempt budget left. Read-only: no lease is taken here -- the dispatcher
/// may emit a task that a worker then fails to lease, which is fine.
pub async fn get_schedulable(
    pool: &PgPool,
    priority: TaskPriority,
    limit: i64,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'pending' \
           AND priority = $1 \
           AND attempts < max_attempts \
           AND (lock_holder IS NULL OR lock_expires_at < now()) \
         ORDER BY created_at ASC \
         LIMIT $2",
    )
    .bind(priority)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to query schedulable tasks")?;

    Ok(tasks)
}

/// Atomically take the lease on a task and move it to `running`.
///
/// Compare-and-set: succeeds only while the row is still `pending`, or
/// `running` with an expired lease (takeover). On success sets
/// `lock_holder = worker_id` and `lock_expires_at = now() + ttl` in the same
/// statement, so lease acquisition and the `running` transition are one
/// write and one arbiter.
pub async fn try_acquire_lease(
    pool: &PgPool,
    task_id: i64,
    worker_id: &str,
    ttl: Duration,
) -> Result<(), LeaseError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'running', \
             lock_holder = $2, \
             lock_expires_at = now() + make_interval(secs => $3), \
             updated_at = now() \
         WHERE id = $1 \
           AND (status = 'pending' OR (status = 'running' AND lock_expires_at < now())) \
           AND (lock_holder IS NULL OR lock_expires_at < now())",
    )
    .bind(task_id)
    .bind(worker_id)
    .bind(ttl.as_secs_f64())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        // Distinguish a missing row from live contention.
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(pool)
            .await?;
        return match exists {
            None => Err(LeaseError::NotFound(task_id)),
            Some(_) => Err(LeaseError::NotAcquired(task_id)),
        };
    }

    Ok(())
}

/// Clear the lease on a task. Leaves `status` untouched -- the terminal
/// status has been written separately by the worker.
pub async fn release_lease(pool: &PgPool, task_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE tasks \
         SET lock_holder = NULL, lock_expires_at = NULL, updated_at = now() \
         WHERE id = $1",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to release task lease")?;

    Ok(())
}

/// Atomically bump the attempt counter, returning the new value.
///
/// Called unconditionally before the lease attempt so that attempts are
/// counted even when the lease is then lost to contention -- a task
/// repeatedly caught in lease races cannot livelock forever.
pub async fn increment_attempts(pool: &PgPool, task_id: i64) -> Result<i32> {
    let attempts: Option<i32> = sqlx::query_scalar(
        "UPDATE tasks SET attempts = attempts + 1, updated_at = now() \
         WHERE id = $1 \
         RETURNING attempts",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to increment task attempts")?;

    attempts.with_context(|| format!("task {task_id} not found"))
}

/// Execute a status transition with optimistic locking.
///
/// Rejects edges outside the task state graph, then performs a
/// compare-and-set on the current status. Returns an error if the task is
/// missing or the database status no longer matches `from`.
pub async fn update_status(
    pool: &PgPool,
    task_id: i64,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<()> {
    if !from.can_transition_to(to) {
        anyhow::bail!("invalid task transition: {from} -> {to} for task {task_id}");
    }

    let result = sqlx::query(
        "UPDATE tasks SET status = $1, updated_at = now() \
         WHERE id = $2 AND status = $3",
    )
    .bind(to)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .with_context(|| format!("failed to transition task {task_id} from {from} to {to}"))?;

    if result.rows_affected() == 0 {
        let task = get_task(pool, task_id).await?;
        match task {
            None => anyhow::bail!("task {task_id} not found"),
            Some(t) => anyhow::bail!(
                "optimistic lock failed: task {task_id} has status {}, expected {from}",
                t.status
            ),
        }
    }

    Ok(())
}

/// Mark a running task completed, storing the handler's result document.
pub async fn mark_completed(pool: &PgPool, task_id: i64, result: &str) -> Result<()> {
    let res = sqlx::query(
        "UPDATE tasks SET status = 'completed', result = $2, updated_at = now() \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(task_id)
    .bind(result)
    .execute(pool)
    .await
    .context("failed to mark task completed")?;

    if res.rows_affected() == 0 {
        anyhow::bail!("task {task_id} is not running; cannot complete");
    }

    Ok(())
}

/// Record a transient handler failure.
///
/// Stores the error and appends to the log column, then routes the task in
/// the same statement: back to `pending` while attempt budget remains
/// (the dispatcher will retry it), to terminal `failed` once
/// `attempts >= max_attempts`. Returns the status chosen.
pub async fn update_failed(
    pool: &PgPool,
    task_id: i64,
    error: &str,
    log: &str,
) -> Result<TaskStatus> {
    let status: Option<TaskStatus> = sqlx::query_scalar(
        "UPDATE tasks \
         SET error = $2, \
             logs = CASE WHEN logs = '' THEN $3 ELSE logs || E'\\n' || $3 END, \
             status = CASE WHEN attempts >= max_attempts \
                           THEN 'failed' ELSE 'pending' END, \
             updated_at = now() \
         WHERE id = $1 AND status = 'running' \
         RETURNING status",
    )
    .bind(task_id)
    .bind(error)
    .bind(log)
    .fetch_optional(pool)
    .await
    .context("failed to record task failure")?;

    status.with_context(|| format!("task {task_id} is not running; cannot record failure"))
}

/// Record a permanent failure: terminal `failed` regardless of remaining
/// attempt budget. Used for semantic errors where a retry cannot succeed.
pub async fn fail_permanent(pool: &PgPool, task_id: i64, error: &str, log: &str) -> Result<()> {
    let res = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', \
             error = $2, \
             logs = CASE WHEN logs = '' THEN $3 ELSE logs || E'\\n' || $3 END, \
             updated_at = now() \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(task_id)
    .bind(error)
    .bind(log)
    .execute(pool)
    .await
    .context("failed to mark task permanently failed")?;

    if res.rows_affected() == 0 {
        anyhow::bail!("task {task_id} is not running; cannot fail");
    }

    Ok(())
}

/// Return a running task to `pending` without recording a failure.
///
/// Used when a handler reports "not yet" (deferred work): the task keeps its
/// already-incremented attempt counter and reappears on the dispatcher's
/// next poll.
pub async fn defer_task(pool: &PgPool, task_id: i64) -> Result<()> {
    update_status(pool, task_id, TaskStatus::Running, TaskStatus::Pending).await
}

/// Operator cancellation: move a non-terminal task to `terminated` and drop
/// its lease.
pub async fn terminate_task(pool: &PgPool, task_id: i64) -> Result<()> {
    let res = sqlx::query(
        "UPDATE tasks \
         SET status = 'terminated', \
             lock_holder = NULL, \
             lock_expires_at = NULL, \
             updated_at = now() \
         WHERE id = $1 AND status IN ('pending', 'running')",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to terminate task")?;

    if res.rows_affected() == 0 {
        let task = get_task(pool, task_id).await?;
        match task {
            None => anyhow::bail!("task {task_id} not found"),
            Some(t) => anyhow::bail!(
                "task {task_id} cannot be terminated: status is {}",
                t.status
            ),
        }
    }

    Ok(())
}

/// Operator override: reset a terminally-failed task to `pending` with a
/// fresh attempt budget.
pub async fn retry_failed(pool: &PgPool, task_id: i64) -> Result<()> {
    let res = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', \
             attempts = 0, \
             lock_holder = NULL, \
             lock_expires_at = NULL, \
             updated_at = now() \
         WHERE id = $1 AND status = 'failed'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to retry task")?;

    if res.rows_affected() == 0 {
        let task = get_task(pool, task_id).await?;
        match task {
            None => anyhow::bail!("task {task_id} not found"),
            Some(t) => anyhow::bail!(
                "task {task_id} cannot be retried: status is {}, expected failed",
                t.status
            ),
        }
    }

    Ok(())
}

/// Reset every `running` task whose lease has expired back to `pending`,
/// clearing the lease and leaving the attempt counter as-is.
///
/// One atomic scan; idempotent. Tasks with live leases or terminal status
/// are never touched. Returns the number of rows reset.
pub async fn recover_stale(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', \
             lock_holder = NULL, \
             lock_expires_at = NULL, \
             updated_at = now() \
         WHERE status = 'running' AND lock_expires_at < now()",
    )
    .execute(pool)
    .await
    .context("failed to recover stale tasks")?;

    Ok(result.rows_affected())
}

/// Record that the completion webhook for a task has been delivered.
pub async fn set_webhook_sent(pool: &PgPool, task_id: i64) -> Result<()> {
    sqlx::query("UPDATE tasks SET webhook_sent = TRUE, updated_at = now() WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set webhook_sent")?;

    Ok(())
}

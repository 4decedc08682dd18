//! The worker loop: consume one priority queue, lease tasks, run handlers,
//! write terminal state.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use armada_db::models::{Task, TaskStatus};
use armada_db::queries::tasks::{self, LeaseError};

use crate::handlers::{self, HandlerContext, HandlerError, HandlerOutcome};
use crate::webhook::WebhookNotifier;

/// Everything one worker needs; built once per worker at startup.
pub(crate) struct WorkerContext {
    pub pool: PgPool,
    pub worker_id: String,
    pub lease_ttl: Duration,
    pub handlers: Arc<HandlerContext>,
    pub webhooks: Arc<WebhookNotifier>,
}

/// Consume tasks from the queue until cancellation or queue closure.
///
/// Workers of one priority class share the receiver behind a mutex:
/// dequeues serialize (cheap), execution does not.
pub(crate) async fn run_worker(
    ctx: WorkerContext,
    queue: Arc<Mutex<mpsc::Receiver<Task>>>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker_id = %ctx.worker_id, "worker started");

    loop {
        let task = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => return,
                },
            }
        };

        process_task(&ctx, task, &cancel).await;
    }
}

/// Run a single task through lease acquisition, its handler, and the
/// terminal write.
///
/// The attempt counter is bumped *before* the lease attempt so that a task
/// repeatedly lost to contention still burns budget and cannot livelock.
async fn process_task(ctx: &WorkerContext, task: Task, cancel: &CancellationToken) {
    let attempts = match tasks::increment_attempts(&ctx.pool, task.id).await {
        Ok(attempts) => attempts,
        Err(err) => {
            tracing::warn!(task_id = task.id, error = %err, "failed to count attempt");
            return;
        }
    };

    match tasks::try_acquire_lease(&ctx.pool, task.id, &ctx.worker_id, ctx.lease_ttl).await {
        Ok(()) => {}
        // Contention is routine: another worker owns the task, or its state
        // moved on since the dispatcher emitted it.
        Err(LeaseError::NotAcquired(_)) | Err(LeaseError::NotFound(_)) => {
            tracing::debug!(task_id = task.id, worker_id = %ctx.worker_id, "lease not acquired");
            return;
        }
        Err(LeaseError::Db(err)) => {
            tracing::warn!(task_id = task.id, error = %err, "lease acquisition failed");
            return;
        }
    }

    tracing::info!(
        task_id = task.id,
        action = %task.action,
        attempt = attempts,
        worker_id = %ctx.worker_id,
        "processing task"
    );

    // Attempt budget check at execution start. The counter can overshoot
    // max_attempts under contention since it advances without the lease.
    if attempts > task.max_attempts {
        let err = format!(
            "attempt budget exhausted ({attempts} > {})",
            task.max_attempts
        );
        if let Err(e) = tasks::fail_permanent(&ctx.pool, task.id, &err, &err).await {
            tracing::error!(task_id = task.id, error = %e, "failed to record budget exhaustion");
        }
        finish(ctx, task.id).await;
        return;
    }

    let outcome = tokio::select! {
        // Shutdown: abort at the handler's next await point. No terminal
        // write and no lease release -- the lease expires on its own and the
        // recovery scan reclaims the task on next boot.
        _ = cancel.cancelled() => {
            tracing::info!(task_id = task.id, "cancelled mid-flight; leaving task to recovery");
            return;
        }
        outcome = handlers::run(&ctx.handlers, &task) => outcome,
    };

    match outcome {
        Ok(HandlerOutcome::Completed { result }) => {
            let result = result.unwrap_or_default();
            if let Err(err) = tasks::mark_completed(&ctx.pool, task.id, &result).await {
                tracing::error!(task_id = task.id, error = %err, "failed to mark task completed");
            } else {
                tracing::info!(task_id = task.id, "task completed");
            }
        }
        Ok(HandlerOutcome::Deferred) => {
            tracing::debug!(task_id = task.id, "task deferred");
            if let Err(err) = tasks::defer_task(&ctx.pool, task.id).await {
                tracing::error!(task_id = task.id, error = %err, "failed to defer task");
            }
        }
        Err(HandlerError::Fatal(err)) => {
            let detail = format!("{err:#}");
            tracing::warn!(task_id = task.id, error = %detail, "task failed permanently");
            let log = format!("attempt {attempts}: {detail}");
            if let Err(e) = tasks::fail_permanent(&ctx.pool, task.id, &detail, &log).await {
                tracing::error!(task_id = task.id, error = %e, "failed to record fatal failure");
            }
        }
        Err(HandlerError::Transient(err)) => {
            let detail = format!("{err:#}");
            let log = format!("attempt {attempts}: {detail}");
            match tasks::update_failed(&ctx.pool, task.id, &detail, &log).await {
                Ok(TaskStatus::Failed) => {
                    tracing::warn!(
                        task_id = task.id,
                        error = %detail,
                        "task failed; attempt budget exhausted"
                    );
                }
                Ok(_) => {
                    tracing::info!(
                        task_id = task.id,
                        error = %detail,
                        attempt = attempts,
                        "task failed; will retry"
                    );
                }
                Err(e) => {
                    tracing::error!(task_id = task.id, error = %e, "failed to record failure");
                }
            }
        }
    }

    finish(ctx, task.id).await;
}

/// Release the lease and fire the completion webhook if the task ended in a
/// terminal state.
async fn finish(ctx: &WorkerContext, task_id: i64) {
    if let Err(err) = tasks::release_lease(&ctx.pool, task_id).await {
        tracing::error!(task_id, error = %err, "failed to release lease");
    }
    ctx.webhooks.notify(&ctx.pool, task_id).await;
}

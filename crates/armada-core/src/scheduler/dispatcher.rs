//! The priority dispatcher: one long-lived poll loop per priority class.
//!
//! Dispatchers are deliberately dumb. They take no leases and keep no
//! state; a task they emit is re-verified by the worker's lease CAS, so a
//! crashed or duplicated dispatcher can cause wasted attempts but never a
//! double execution.

use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use armada_db::models::{Task, TaskPriority};
use armada_db::queries::tasks;

pub(crate) struct DispatcherConfig {
    pub priority: TaskPriority,
    pub batch_size: i64,
    /// Delay between polls that returned work.
    pub poll_interval: Duration,
    /// Delay after an empty poll or a database error.
    pub backoff: Duration,
}

/// Poll for schedulable tasks and push them into the priority queue until
/// cancelled.
pub(crate) async fn run_dispatcher(
    pool: PgPool,
    config: DispatcherConfig,
    queue: mpsc::Sender<Task>,
    cancel: CancellationToken,
) {
    let priority = config.priority;
    tracing::debug!(%priority, "dispatcher started");

    loop {
        let delay = match tasks::get_schedulable(&pool, priority, config.batch_size).await {
            Ok(batch) if batch.is_empty() => config.backoff,
            Ok(batch) => {
                tracing::debug!(%priority, count = batch.len(), "dispatching tasks");
                for task in batch {
                    // The queue is bounded; a full queue backpressures the
                    // poll loop here rather than piling tasks up in memory.
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = queue.send(task) => {
                            if sent.is_err() {
                                // All workers are gone; nothing left to feed.
                                return;
                            }
                        }
                    }
                }
                config.poll_interval
            }
            Err(err) => {
                tracing::warn!(%priority, error = %err, "schedulable query failed");
                config.backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

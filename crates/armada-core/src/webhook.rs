//! Best-effort completion webhooks.
//!
//! When a task carries a `webhook_url`, the worker posts a small JSON
//! document after the terminal write. Delivery is strictly best-effort: a
//! failed webhook is logged and never affects the task (spec: the task has
//! already completed or failed on its own merits).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::PgPool;

use armada_db::queries::tasks;

/// JSON body posted to the webhook URL.
#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    task_id: i64,
    status: String,
    error: &'a str,
    result: &'a str,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self { client })
    }

    /// Deliver the completion webhook for a task, if one is due.
    ///
    /// No-op unless the task is terminal, has a webhook URL, and has not
    /// been notified yet. All failures are swallowed after logging.
    pub async fn notify(&self, pool: &PgPool, task_id: i64) {
        let task = match tasks::get_task(pool, task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(task_id, error = %err, "webhook: failed to load task");
                return;
            }
        };

        if !task.status.is_terminal() || task.webhook_url.is_empty() || task.webhook_sent {
            return;
        }

        let body = WebhookBody {
            task_id: task.id,
            status: task.status.to_string(),
            error: &task.error,
            result: &task.result,
        };

        let response = self
            .client
            .post(&task.webhook_url)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                if let Err(err) = tasks::set_webhook_sent(pool, task.id).await {
                    tracing::warn!(task_id, error = %err, "webhook delivered but not recorded");
                }
            }
            Ok(resp) => {
                tracing::warn!(
                    task_id,
                    status = %resp.status(),
                    url = %task.webhook_url,
                    "webhook rejected"
                );
            }
            Err(err) => {
                tracing::warn!(task_id, url = %task.webhook_url, error = %err, "webhook failed");
            }
        }
    }
}

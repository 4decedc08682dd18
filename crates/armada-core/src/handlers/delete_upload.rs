//! The delete-upload handler: deferred recursive removal of an upload
//! directory.
//!
//! Until the requested deletion time the handler reports `Deferred`, which
//! returns the task to `pending` with no failure recorded; the dispatcher
//! re-emits it on a later poll. Submitting layers size `max_attempts`
//! accordingly, since every poll of a deferred task consumes an attempt.

use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armada_db::models::Task;

use super::{HandlerContext, HandlerError, HandlerOutcome, HandlerResult};

/// Payload schema of `delete_upload` tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUploadRequest {
    pub upload_path: PathBuf,
    /// Earliest time the deletion may run.
    pub deletion_timestamp: DateTime<Utc>,
}

pub(super) async fn run(ctx: &HandlerContext, task: &Task) -> HandlerResult {
    let req: DeleteUploadRequest = serde_json::from_value(task.payload.clone())
        .map_err(|e| HandlerError::fatal(anyhow!("invalid delete_upload payload: {e}")))?;

    if Utc::now() < req.deletion_timestamp {
        tracing::debug!(
            task_id = task.id,
            path = %req.upload_path.display(),
            not_before = %req.deletion_timestamp,
            "upload deletion deferred"
        );
        return Ok(HandlerOutcome::Deferred);
    }

    // Containment check: a cleanup must never escape the uploads tree.
    if let Some(root) = &ctx.uploads_root {
        if !req.upload_path.starts_with(root) {
            return Err(HandlerError::fatal(anyhow!(
                "upload path {} is outside the uploads root {}",
                req.upload_path.display(),
                root.display()
            )));
        }
    }

    match tokio::fs::remove_dir_all(&req.upload_path).await {
        Ok(()) => {
            tracing::info!(task_id = task.id, path = %req.upload_path.display(), "upload removed");
        }
        // Already gone counts as done; retries and replays converge.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                task_id = task.id,
                path = %req.upload_path.display(),
                "upload already absent"
            );
        }
        Err(err) => {
            return Err(HandlerError::Transient(anyhow!(err).context(format!(
                "failed to remove upload at {}",
                req.upload_path.display()
            ))));
        }
    }

    Ok(HandlerOutcome::completed())
}

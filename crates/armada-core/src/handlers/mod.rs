//! Per-action task handlers.
//!
//! Each handler drives one task action to an outcome. Handlers own every
//! write to `instance.status`; no other component touches it. Errors carry
//! a retry class: [`HandlerError::Transient`] failures consume attempt
//! budget and come back, [`HandlerError::Fatal`] ones park the task in
//! terminal `failed` immediately.

mod create;
mod delete_upload;
mod terminate;

pub use delete_upload::DeleteUploadRequest;

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::PgPool;

use armada_db::models::{Task, TaskAction};

use crate::registry::{ProviderRegistry, ProvisionerRegistry};

/// What a handler produced.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The task's work is done; `result` is stored on the task row.
    Completed { result: Option<String> },
    /// The task's time has not come yet; return it to `pending` untouched
    /// and let the dispatcher re-emit it on a later poll.
    Deferred,
}

impl HandlerOutcome {
    pub fn completed() -> Self {
        Self::Completed { result: None }
    }

    pub fn completed_with(result: impl Into<String>) -> Self {
        Self::Completed {
            result: Some(result.into()),
        }
    }
}

/// Handler failure, classified by retry eligibility.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A semantic error: malformed payload, unknown or terminated instance
    /// state. Retrying cannot succeed.
    #[error(transparent)]
    Fatal(anyhow::Error),
    /// A transient infrastructure or vendor error. The task is eligible for
    /// retry while attempt budget remains.
    #[error(transparent)]
    Transient(anyhow::Error),
}

impl HandlerError {
    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(err.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

// Plain `?` on anyhow results yields the retryable class; fatality is
// always an explicit decision.
impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient(err)
    }
}

pub type HandlerResult = Result<HandlerOutcome, HandlerError>;

/// Shared dependencies of all handlers.
pub struct HandlerContext {
    pub pool: PgPool,
    pub providers: Arc<ProviderRegistry>,
    pub provisioners: Arc<ProvisionerRegistry>,
    /// Private key handed to the provisioner for inventory generation.
    pub ssh_key_path: PathBuf,
    /// When set, delete-upload refuses paths outside this directory.
    pub uploads_root: Option<PathBuf>,
}

/// Dispatch a task to the handler for its action.
pub async fn run(ctx: &HandlerContext, task: &Task) -> HandlerResult {
    match task.action {
        TaskAction::CreateInstances => create::run(ctx, task).await,
        TaskAction::TerminateInstances => terminate::run(ctx, task).await,
        TaskAction::DeleteUpload => delete_upload::run(ctx, task).await,
    }
}

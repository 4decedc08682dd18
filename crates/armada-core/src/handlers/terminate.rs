//! The terminate-instances handler: deletes the instance at the vendor and
//! soft-deletes the row.
//!
//! Termination is idempotent end to end: a missing row, an already
//! terminated instance, and a vendor-side not-found all count as success,
//! so a retried or replayed task converges.

use anyhow::{Context, anyhow};

use armada_db::models::{InstanceStatus, Task};
use armada_db::queries::instances;

use super::{HandlerContext, HandlerError, HandlerOutcome, HandlerResult};
use crate::provider::types::DeleteInstanceRequest;

pub(super) async fn run(ctx: &HandlerContext, task: &Task) -> HandlerResult {
    let req: DeleteInstanceRequest = serde_json::from_value(task.payload.clone())
        .map_err(|e| HandlerError::fatal(anyhow!("invalid terminate_instances payload: {e}")))?;

    let instance_id = if task.instance_id != 0 {
        task.instance_id
    } else {
        req.instance_id
    };

    let Some(instance) = instances::get_instance(&ctx.pool, instance_id).await? else {
        tracing::info!(instance_id, "instance already gone; nothing to terminate");
        return Ok(HandlerOutcome::completed());
    };

    if instance.status == InstanceStatus::Terminated {
        return Ok(HandlerOutcome::completed());
    }

    // An instance that never reached the vendor has nothing to delete there.
    if !instance.provider_instance_id.is_empty() {
        let provider = ctx
            .providers
            .get(&instance.provider_id)
            .await
            .with_context(|| format!("no provider for vendor {:?}", instance.provider_id))?;

        match provider.delete_instance(&instance.provider_instance_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                tracing::info!(
                    instance_id,
                    provider_instance_id = %instance.provider_instance_id,
                    "vendor reports instance already deleted"
                );
            }
            Err(err) => {
                return Err(HandlerError::Transient(anyhow!(err).context(format!(
                    "vendor delete failed for instance {instance_id}"
                ))));
            }
        }
    }

    instances::terminate_instance(&ctx.pool, instance_id).await?;

    tracing::info!(instance_id, "instance terminated");
    Ok(HandlerOutcome::completed())
}

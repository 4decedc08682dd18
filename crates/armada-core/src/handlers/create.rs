//! The create-instances handler: drives an instance from `pending` to
//! `ready` through vendor creation and optional provisioning.
//!
//! The status switch falls through on purpose. A task replayed after a
//! crash finds the instance wherever the previous attempt left it and a
//! single invocation advances it the rest of the way, without redoing
//! external side effects that already happened.

use anyhow::{Context, anyhow};

use armada_db::models::{Instance, InstanceStatus, PayloadStatus, Task};
use armada_db::queries::instances;

use super::{HandlerContext, HandlerError, HandlerOutcome, HandlerResult};
use crate::provider::InstanceRequest;

/// Playbook tag applied on every provisioning run.
const TAG_SETUP: &str = "setup";
/// Extra tag for vendors that attach block storage out-of-band.
const TAG_VOLUMES: &str = "volumes";

pub(super) async fn run(ctx: &HandlerContext, task: &Task) -> HandlerResult {
    let mut req: InstanceRequest = serde_json::from_value(task.payload.clone())
        .map_err(|e| HandlerError::fatal(anyhow!("invalid create_instances payload: {e}")))?;

    let instance_id = if task.instance_id != 0 {
        task.instance_id
    } else {
        req.instance_id
    };

    let instance = instances::get_instance(&ctx.pool, instance_id)
        .await?
        .ok_or_else(|| HandlerError::fatal(anyhow!("instance {instance_id} not found")))?;

    // A replay that skipped the vendor call still needs the network identity
    // for inventory generation; the instance row has it.
    rehydrate_from_row(&mut req, &instance);

    let provider = ctx
        .providers
        .get(&instance.provider_id)
        .await
        .with_context(|| format!("no provider for vendor {:?}", instance.provider_id))?;

    let mut status = instance.status;

    if status == InstanceStatus::Pending {
        provider
            .create_instance(&mut req)
            .await
            .with_context(|| format!("vendor create failed for instance {instance_id}"))?;

        let volume_details = serde_json::to_value(&req.volume_details)
            .context("failed to encode volume details")?;
        instances::record_created(
            &ctx.pool,
            instance_id,
            &req.public_ip,
            &req.provider_instance_id,
            &req.volume_ids,
            &volume_details,
        )
        .await?;

        tracing::info!(
            instance_id,
            public_ip = %req.public_ip,
            provider_instance_id = %req.provider_instance_id,
            "instance created at vendor"
        );
        status = InstanceStatus::Created;
    }

    if status == InstanceStatus::Created {
        if !req.provision {
            instances::update_status(
                &ctx.pool,
                instance_id,
                InstanceStatus::Created,
                InstanceStatus::Ready,
            )
            .await?;
            return Ok(HandlerOutcome::completed_with(encode_result(&req)?));
        }

        instances::update_status(
            &ctx.pool,
            instance_id,
            InstanceStatus::Created,
            InstanceStatus::Provisioning,
        )
        .await?;
        status = InstanceStatus::Provisioning;
    }

    if status == InstanceStatus::Provisioning {
        let provisioner = ctx
            .provisioners
            .get(&instance.provider_id)
            .await
            .with_context(|| format!("no provisioner for vendor {:?}", instance.provider_id))?;

        let hosts = vec![req.public_ip.clone()];
        provisioner
            .configure_hosts(&hosts, &ctx.ssh_key_path)
            .await
            .with_context(|| format!("host configuration failed for instance {instance_id}"))?;

        let inventory = provisioner
            .create_inventory(&req, &ctx.ssh_key_path)
            .with_context(|| format!("failed to build inventory for instance {instance_id}"))?;

        let mut tags = vec![TAG_SETUP.to_owned()];
        if provider.volumes_out_of_band() {
            tags.push(TAG_VOLUMES.to_owned());
        }

        provisioner
            .run_playbook(&inventory, &tags)
            .await
            .with_context(|| format!("playbook failed for instance {instance_id}"))?;

        instances::update_status(
            &ctx.pool,
            instance_id,
            InstanceStatus::Provisioning,
            InstanceStatus::Ready,
        )
        .await?;

        if !req.payload_path.is_empty() {
            instances::update_payload_status(&ctx.pool, instance_id, PayloadStatus::Executed)
                .await?;
        }

        tracing::info!(instance_id, "instance provisioned and ready");
        return Ok(HandlerOutcome::completed_with(encode_result(&req)?));
    }

    match status {
        // Crash repair: the previous attempt finished the instance but died
        // before completing the task. Succeed so the task can close.
        InstanceStatus::Ready => Ok(HandlerOutcome::completed()),
        InstanceStatus::Terminated => Err(HandlerError::fatal(anyhow!(
            "cannot create instance {instance_id}: it is terminated"
        ))),
        other => Err(HandlerError::fatal(anyhow!(
            "instance {instance_id} in unexpected state {other}"
        ))),
    }
}

/// Copy vendor-populated fields from the instance row into the request when
/// the payload predates them.
fn rehydrate_from_row(req: &mut InstanceRequest, instance: &Instance) {
    if req.public_ip.is_empty() && !instance.public_ip.is_empty() {
        req.public_ip = instance.public_ip.clone();
    }
    if req.provider_instance_id.is_empty() && !instance.provider_instance_id.is_empty() {
        req.provider_instance_id = instance.provider_instance_id.clone();
    }
    if req.volume_ids.is_empty() && !instance.volume_ids.is_empty() {
        req.volume_ids = instance.volume_ids.clone();
    }
    if req.volume_details.is_empty() {
        if let Ok(details) = serde_json::from_value(instance.volume_details.clone()) {
            req.volume_details = details;
        }
    }
}

fn encode_result(req: &InstanceRequest) -> Result<String, HandlerError> {
    serde_json::to_string(req)
        .context("failed to encode create result")
        .map_err(HandlerError::from)
}

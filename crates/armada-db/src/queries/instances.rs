//! Database query functions for the `instances` table.
//!
//! Instance status writes go through compare-and-set updates so the create
//! path stays monotone (`pending -> created -> provisioning -> ready`);
//! only termination may interrupt it.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Instance, InstanceStatus, NewInstance, PayloadStatus};

/// Insert a batch of instances atomically (all or nothing). Returns the
/// inserted rows with server-generated defaults (id, status, timestamps).
pub async fn insert_instance_batch(pool: &PgPool, batch: &[NewInstance]) -> Result<Vec<Instance>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let mut inserted = Vec::with_capacity(batch.len());
    for new in batch {
        let instance = sqlx::query_as::<_, Instance>(
            "INSERT INTO instances (owner_id, project_id, name, provider_id, region, size, \
                                    payload_status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING *",
        )
        .bind(new.owner_id)
        .bind(new.project_id)
        .bind(&new.name)
        .bind(&new.provider_id)
        .bind(&new.region)
        .bind(&new.size)
        .bind(new.payload_status)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert instance in batch")?;
        inserted.push(instance);
    }

    tx.commit().await.context("failed to commit instance batch")?;
    Ok(inserted)
}

/// Fetch a single instance by ID.
pub async fn get_instance(pool: &PgPool, id: i64) -> Result<Option<Instance>> {
    let instance = sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch instance")?;

    Ok(instance)
}

/// List all instances in a project, ordered by creation time.
pub async fn list_instances(pool: &PgPool, owner_id: i64, project_id: i64) -> Result<Vec<Instance>> {
    let instances = sqlx::query_as::<_, Instance>(
        "SELECT * FROM instances \
         WHERE owner_id = $1 AND project_id = $2 \
         ORDER BY created_at ASC",
    )
    .bind(owner_id)
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list instances")?;

    Ok(instances)
}

/// Execute an instance status transition with optimistic locking.
///
/// Rejects edges outside the instance state machine, then performs a
/// compare-and-set on the current status.
pub async fn update_status(
    pool: &PgPool,
    instance_id: i64,
    from: InstanceStatus,
    to: InstanceStatus,
) -> Result<()> {
    if !from.can_transition_to(to) {
        anyhow::bail!("invalid instance transition: {from} -> {to} for instance {instance_id}");
    }

    let result = sqlx::query(
        "UPDATE instances SET status = $1, updated_at = now() \
         WHERE id = $2 AND status = $3",
    )
    .bind(to)
    .bind(instance_id)
    .bind(from)
    .execute(pool)
    .await
    .with_context(|| {
        format!("failed to transition instance {instance_id} from {from} to {to}")
    })?;

    if result.rows_affected() == 0 {
        let instance = get_instance(pool, instance_id).await?;
        match instance {
            None => anyhow::bail!("instance {instance_id} not found"),
            Some(i) => anyhow::bail!(
                "optimistic lock failed: instance {instance_id} has status {}, expected {from}",
                i.status
            ),
        }
    }

    Ok(())
}

/// Record the vendor's create result in one write: network identity, volume
/// descriptors, and the `pending -> created` transition. Guarded on
/// `pending` so a replayed task cannot clobber a later state.
pub async fn record_created(
    pool: &PgPool,
    instance_id: i64,
    public_ip: &str,
    provider_instance_id: &str,
    volume_ids: &[String],
    volume_details: &serde_json::Value,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE instances \
         SET status = 'created', \
             public_ip = $2, \
             provider_instance_id = $3, \
             volume_ids = $4, \
             volume_details = $5, \
             updated_at = now() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(instance_id)
    .bind(public_ip)
    .bind(provider_instance_id)
    .bind(volume_ids)
    .bind(volume_details)
    .execute(pool)
    .await
    .context("failed to record instance creation")?;

    if result.rows_affected() == 0 {
        let instance = get_instance(pool, instance_id).await?;
        match instance {
            None => anyhow::bail!("instance {instance_id} not found"),
            Some(i) => anyhow::bail!(
                "cannot record creation for instance {instance_id}: status is {}, expected pending",
                i.status
            ),
        }
    }

    Ok(())
}

/// Update the payload execution marker.
pub async fn update_payload_status(
    pool: &PgPool,
    instance_id: i64,
    payload_status: PayloadStatus,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE instances SET payload_status = $1, updated_at = now() WHERE id = $2",
    )
    .bind(payload_status)
    .bind(instance_id)
    .execute(pool)
    .await
    .context("failed to update instance payload status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("instance {instance_id} not found");
    }

    Ok(())
}

/// Soft-delete an instance: set `terminated` from any live state, keeping
/// the row. Idempotent -- terminating an already-terminated instance is a
/// no-op.
pub async fn terminate_instance(pool: &PgPool, instance_id: i64) -> Result<()> {
    let result = sqlx::query(
        "UPDATE instances SET status = 'terminated', updated_at = now() \
         WHERE id = $1 AND status != 'terminated'",
    )
    .bind(instance_id)
    .execute(pool)
    .await
    .context("failed to terminate instance")?;

    if result.rows_affected() == 0 {
        // Either missing or already terminated; only the former is an error.
        let instance = get_instance(pool, instance_id).await?;
        if instance.is_none() {
            anyhow::bail!("instance {instance_id} not found");
        }
    }

    Ok(())
}

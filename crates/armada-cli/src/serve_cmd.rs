//! `armada serve` command: run the scheduler until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio_util::sync::CancellationToken;

use armada_core::provider::{DevProvider, Provider};
use armada_core::provisioner::Provisioner;
use armada_core::registry::{ProviderRegistry, ProvisionerRegistry};
use armada_core::scheduler::Scheduler;
use armada_db::pool;

use crate::config::ArmadaConfig;

/// CLI flag overrides applied on top of the resolved config.
pub struct ServeOverrides {
    pub workers: Option<usize>,
    pub high_ratio: Option<f64>,
    pub poll_secs: Option<u64>,
    pub lease_ttl_secs: Option<u64>,
}

/// Build the provider registry for this deployment.
///
/// Only the in-memory dev vendor ships with the binary; real vendor
/// adapters are linked in by the embedding deployment and registered here.
fn provider_registry() -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new(|vendor| match vendor {
        "dev" => Ok(Arc::new(DevProvider::new()) as Arc<dyn Provider>),
        other => Err(anyhow!("no provider registered for vendor {other:?}")),
    }))
}

fn provisioner_registry() -> Arc<ProvisionerRegistry> {
    Arc::new(ProvisionerRegistry::new(|vendor| {
        Err::<Arc<dyn Provisioner>, _>(anyhow!(
            "no provisioner registered for vendor {vendor:?}"
        ))
    }))
}

pub async fn run_serve(cli_db_url: Option<&str>, overrides: ServeOverrides) -> Result<()> {
    let resolved = ArmadaConfig::resolve(cli_db_url)?;

    let mut scheduler_config = resolved.scheduler;
    if let Some(workers) = overrides.workers {
        scheduler_config.worker_count = workers;
    }
    if let Some(ratio) = overrides.high_ratio {
        scheduler_config.high_priority_ratio = ratio;
    }
    if let Some(secs) = overrides.poll_secs {
        scheduler_config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = overrides.lease_ttl_secs {
        scheduler_config.lease_ttl = Duration::from_secs(secs);
    }

    let db_pool = pool::connect(&resolved.db_config).await?;

    let scheduler = Scheduler::new(
        db_pool,
        provider_registry(),
        provisioner_registry(),
        scheduler_config,
    )?;

    // Ctrl-C cancels; workers abort queue waits immediately and in-flight
    // leases are reclaimed by recovery on the next start.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    scheduler.run(cancel).await
}

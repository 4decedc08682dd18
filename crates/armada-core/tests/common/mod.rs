//! Shared fixtures for armada-core integration tests: recording
//! provider/provisioner doubles and row-construction helpers.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use armada_core::handlers::HandlerContext;
use armada_core::provider::{InstanceRequest, Provider, ProviderError};
use armada_core::provisioner::Provisioner;
use armada_core::registry::{ProviderRegistry, ProvisionerRegistry};
use armada_db::models::{
    Instance, NewInstance, NewTask, PayloadStatus, Task, TaskAction, TaskPriority,
};
use armada_db::queries::{instances, tasks};

// ---------------------------------------------------------------------------
// Recording provider
// ---------------------------------------------------------------------------

pub enum CreateBehavior {
    /// Fill the vendor fields and succeed.
    Succeed,
    /// Always fail with a transient-looking vendor error.
    FailTransient,
    /// Never return; used to hold a task in flight across a shutdown.
    Hang,
}

pub enum DeleteBehavior {
    Succeed,
    /// Typed not-found.
    NotFound,
    /// Opaque error whose message only hints at not-found.
    NotFoundMessage,
    FailTransient,
}

/// A vendor double that records every call.
pub struct RecordingProvider {
    vendor: String,
    volumes_oob: bool,
    create_behavior: CreateBehavior,
    delete_behavior: DeleteBehavior,
    pub public_ip: String,
    pub create_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl RecordingProvider {
    pub fn new(vendor: &str) -> Self {
        Self {
            vendor: vendor.to_owned(),
            volumes_oob: false,
            create_behavior: CreateBehavior::Succeed,
            delete_behavior: DeleteBehavior::Succeed,
            public_ip: "203.0.113.5".to_owned(),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_volumes_out_of_band(mut self) -> Self {
        self.volumes_oob = true;
        self
    }

    pub fn with_create_behavior(mut self, behavior: CreateBehavior) -> Self {
        self.create_behavior = behavior;
        self
    }

    pub fn with_delete_behavior(mut self, behavior: DeleteBehavior) -> Self {
        self.delete_behavior = behavior;
        self
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        &self.vendor
    }

    fn volumes_out_of_band(&self) -> bool {
        self.volumes_oob
    }

    async fn create_instance(&self, req: &mut InstanceRequest) -> Result<()> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.create_behavior {
            CreateBehavior::Succeed => {
                req.public_ip = self.public_ip.clone();
                req.provider_instance_id = format!("vm-{n:05}");
                req.volume_ids = (0..req.volumes.len()).map(|i| format!("vol-{n}-{i}")).collect();
                Ok(())
            }
            CreateBehavior::FailTransient => Err(anyhow!("vendor unavailable (503)")),
            CreateBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn delete_instance(&self, provider_instance_id: &str) -> Result<(), ProviderError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        match self.delete_behavior {
            DeleteBehavior::Succeed => Ok(()),
            DeleteBehavior::NotFound => {
                Err(ProviderError::NotFound(provider_instance_id.to_owned()))
            }
            DeleteBehavior::NotFoundMessage => {
                Err(ProviderError::Other(anyhow!("resource not found (404)")))
            }
            DeleteBehavior::FailTransient => {
                Err(ProviderError::Other(anyhow!("vendor unavailable (503)")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Recording provisioner
// ---------------------------------------------------------------------------

/// A configuration-tool double that records playbook runs.
#[derive(Default)]
pub struct RecordingProvisioner {
    pub playbook_runs: StdMutex<Vec<Vec<String>>>,
    pub inventory_ips: StdMutex<Vec<String>>,
}

impl RecordingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded_tags(&self) -> Vec<Vec<String>> {
        self.playbook_runs.lock().expect("mutex poisoned").clone()
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    fn name(&self) -> &str {
        "recording"
    }

    async fn configure_hosts(&self, _hosts: &[String], _ssh_key_path: &std::path::Path) -> Result<()> {
        Ok(())
    }

    fn create_inventory(
        &self,
        req: &InstanceRequest,
        _ssh_key_path: &std::path::Path,
    ) -> Result<PathBuf> {
        // The handler must hand us a request with a network identity, even
        // on replay.
        if req.public_ip.is_empty() {
            anyhow::bail!("cannot build inventory without a public IP");
        }
        self.inventory_ips
            .lock()
            .expect("mutex poisoned")
            .push(req.public_ip.clone());
        Ok(PathBuf::from(format!("/tmp/inventory-{}", req.instance_id)))
    }

    async fn run_playbook(&self, _inventory_path: &std::path::Path, tags: &[String]) -> Result<()> {
        self.playbook_runs
            .lock()
            .expect("mutex poisoned")
            .push(tags.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry and context construction
// ---------------------------------------------------------------------------

/// A provider registry that resolves every vendor tag to the given double.
pub fn provider_registry(provider: Arc<RecordingProvider>) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new(move |_| {
        Ok(Arc::clone(&provider) as Arc<dyn Provider>)
    }))
}

/// A provisioner registry that resolves every vendor tag to the given double.
pub fn provisioner_registry(provisioner: Arc<RecordingProvisioner>) -> Arc<ProvisionerRegistry> {
    Arc::new(ProvisionerRegistry::new(move |_| {
        Ok(Arc::clone(&provisioner) as Arc<dyn Provisioner>)
    }))
}

/// A provisioner registry whose lookups always fail (for tests that must
/// not provision).
pub fn no_provisioner_registry() -> Arc<ProvisionerRegistry> {
    Arc::new(ProvisionerRegistry::new(|vendor| {
        Err(anyhow!("no provisioner registered for vendor {vendor:?}"))
    }))
}

pub fn handler_ctx(
    pool: &PgPool,
    providers: Arc<ProviderRegistry>,
    provisioners: Arc<ProvisionerRegistry>,
) -> HandlerContext {
    HandlerContext {
        pool: pool.clone(),
        providers,
        provisioners,
        ssh_key_path: PathBuf::from("/tmp/test-ssh-key"),
        uploads_root: None,
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub async fn insert_test_instance(
    pool: &PgPool,
    provider_id: &str,
    payload_status: PayloadStatus,
) -> Instance {
    let inserted = instances::insert_instance_batch(
        pool,
        &[NewInstance {
            owner_id: 1,
            project_id: 1,
            name: "node-0".to_owned(),
            provider_id: provider_id.to_owned(),
            region: "nyc3".to_owned(),
            size: "s-1vcpu-1gb".to_owned(),
            payload_status,
        }],
    )
    .await
    .expect("instance insert should succeed");
    inserted.into_iter().next().expect("one row inserted")
}

/// Force an instance row into a specific state, bypassing the monotone CAS.
/// Used to stage crash-replay scenarios.
pub async fn force_instance_state(pool: &PgPool, instance_id: i64, status: &str) {
    sqlx::query("UPDATE instances SET status = $1::text, updated_at = now() WHERE id = $2")
        .bind(status)
        .bind(instance_id)
        .execute(pool)
        .await
        .expect("forced status update should succeed");
}

/// Payload for a create-instances task targeting `instance`.
pub fn create_payload(
    instance: &Instance,
    provision: bool,
    payload_path: &str,
) -> serde_json::Value {
    serde_json::json!({
        "instance_id": instance.id,
        "owner_id": instance.owner_id,
        "provider": instance.provider_id,
        "region": instance.region,
        "size": instance.size,
        "provision": provision,
        "payload_path": payload_path,
    })
}

pub async fn insert_create_task(
    pool: &PgPool,
    instance: &Instance,
    provision: bool,
    payload_path: &str,
    max_attempts: i32,
) -> Task {
    tasks::insert_task(
        pool,
        &NewTask {
            owner_id: instance.owner_id,
            project_id: instance.project_id,
            instance_id: instance.id,
            action: TaskAction::CreateInstances,
            priority: TaskPriority::High,
            payload: create_payload(instance, provision, payload_path),
            max_attempts,
            webhook_url: String::new(),
        },
    )
    .await
    .expect("task insert should succeed")
}

pub async fn insert_terminate_task(pool: &PgPool, instance: &Instance) -> Task {
    tasks::insert_task(
        pool,
        &NewTask {
            owner_id: instance.owner_id,
            project_id: instance.project_id,
            instance_id: instance.id,
            action: TaskAction::TerminateInstances,
            priority: TaskPriority::High,
            payload: serde_json::json!({ "instance_id": instance.id }),
            max_attempts: 3,
            webhook_url: String::new(),
        },
    )
    .await
    .expect("task insert should succeed")
}

pub async fn insert_delete_upload_task(
    pool: &PgPool,
    upload_path: &std::path::Path,
    deletion_timestamp: DateTime<Utc>,
    max_attempts: i32,
) -> Task {
    tasks::insert_task(
        pool,
        &NewTask {
            owner_id: 1,
            project_id: 1,
            instance_id: 0,
            action: TaskAction::DeleteUpload,
            priority: TaskPriority::Low,
            payload: serde_json::json!({
                "upload_path": upload_path,
                "deletion_timestamp": deletion_timestamp,
            }),
            max_attempts,
            webhook_url: String::new(),
        },
    )
    .await
    .expect("task insert should succeed")
}

// ---------------------------------------------------------------------------
// Polling helpers
// ---------------------------------------------------------------------------

/// Poll `check` every 25ms until it returns true or the timeout elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

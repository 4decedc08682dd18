//! End-to-end scheduler tests: dispatcher, worker pool, handlers, and
//! recovery running together against a temporary database with recording
//! vendor doubles.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use armada_core::registry::{ProviderRegistry, ProvisionerRegistry};
use armada_core::scheduler::{Scheduler, SchedulerConfig};
use armada_db::models::{InstanceStatus, PayloadStatus, TaskStatus};
use armada_db::queries::{instances, tasks};

use armada_test_utils::TestDb;
use common::*;

/// Small, fast configuration for tests: one worker per class.
fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        worker_count: 2,
        high_priority_ratio: 0.5,
        poll_interval: Duration::from_millis(50),
        backoff: Duration::from_millis(50),
        lease_ttl: Duration::from_secs(5),
        dispatcher_batch_size: 10,
        queue_capacity: 100,
        recovery_interval: Duration::from_millis(500),
        ssh_key_path: PathBuf::from("/tmp/test-ssh-key"),
        uploads_root: None,
    }
}

fn start_scheduler(
    pool: &PgPool,
    providers: Arc<ProviderRegistry>,
    provisioners: Arc<ProvisionerRegistry>,
    config: SchedulerConfig,
) -> (CancellationToken, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(pool.clone(), providers, provisioners, config)
        .expect("scheduler should construct");
    let handle = tokio::spawn(scheduler.run(cancel.clone()));
    (cancel, handle)
}

async fn task_status(pool: &PgPool, task_id: i64) -> TaskStatus {
    tasks::get_task(pool, task_id)
        .await
        .expect("get should succeed")
        .expect("task should exist")
        .status
}

// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_create_reaches_completed_and_ready() {
    let db = TestDb::new().await;

    let provider = Arc::new(RecordingProvider::new("dev"));
    let (cancel, handle) = start_scheduler(
        &db.pool,
        provider_registry(Arc::clone(&provider)),
        no_provisioner_registry(),
        test_config(),
    );

    let instance = insert_test_instance(&db.pool, "dev", PayloadStatus::None).await;
    let task = insert_create_task(&db.pool, &instance, false, "", 3).await;

    let done = wait_for(Duration::from_secs(10), || async {
        task_status(&db.pool, task.id).await == TaskStatus::Completed
    })
    .await;
    assert!(done, "task should complete");

    let row = tasks::get_task(&db.pool, task.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(row.attempts, 1);
    assert!(row.lock_holder.is_none(), "lease must be released");
    assert!(row.result.contains("203.0.113.5"));

    let inst = instances::get_instance(&db.pool, instance.id)
        .await
        .expect("get should succeed")
        .expect("instance should exist");
    assert_eq!(inst.status, InstanceStatus::Ready);
    assert_eq!(inst.public_ip, "203.0.113.5");
    assert_eq!(provider.create_calls.load(Ordering::SeqCst), 1);

    cancel.cancel();
    handle.await.expect("join should succeed").expect("scheduler should exit cleanly");
    db.teardown().await;
}

#[tokio::test]
async fn provisioned_create_runs_playbook_and_executes_payload() {
    let db = TestDb::new().await;

    let provider = Arc::new(RecordingProvider::new("dev"));
    let provisioner = Arc::new(RecordingProvisioner::new());
    let (cancel, handle) = start_scheduler(
        &db.pool,
        provider_registry(Arc::clone(&provider)),
        provisioner_registry(Arc::clone(&provisioner)),
        test_config(),
    );

    let instance = insert_test_instance(&db.pool, "dev", PayloadStatus::PendingCopy).await;
    let task = insert_create_task(&db.pool, &instance, true, "/uploads/payload.sh", 3).await;

    let done = wait_for(Duration::from_secs(10), || async {
        task_status(&db.pool, task.id).await == TaskStatus::Completed
    })
    .await;
    assert!(done, "task should complete");

    assert_eq!(provisioner.recorded_tags(), vec![vec!["setup".to_owned()]]);

    let inst = instances::get_instance(&db.pool, instance.id)
        .await
        .expect("get should succeed")
        .expect("instance should exist");
    assert_eq!(inst.status, InstanceStatus::Ready);
    assert_eq!(inst.payload_status, PayloadStatus::Executed);

    cancel.cancel();
    handle.await.expect("join should succeed").expect("scheduler should exit cleanly");
    db.teardown().await;
}

#[tokio::test]
async fn deferred_cleanup_waits_for_its_timestamp() {
    let db = TestDb::new().await;

    let provider = Arc::new(RecordingProvider::new("dev"));
    let (cancel, handle) = start_scheduler(
        &db.pool,
        provider_registry(provider),
        no_provisioner_registry(),
        test_config(),
    );

    let dir = tempfile::tempdir().expect("tempdir should create");
    let upload_path = dir.path().to_path_buf();
    let task = insert_delete_upload_task(
        &db.pool,
        &upload_path,
        Utc::now() + ChronoDuration::seconds(2),
        1000,
    )
    .await;

    // Within the deferral window: the task keeps cycling back to pending
    // and the directory stays.
    let polled = wait_for(Duration::from_secs(2), || async {
        let row = tasks::get_task(&db.pool, task.id)
            .await
            .expect("get should succeed")
            .expect("task should exist");
        row.status == TaskStatus::Pending && row.attempts >= 1
    })
    .await;
    assert!(polled, "task should have been polled and deferred");
    assert_ne!(task_status(&db.pool, task.id).await, TaskStatus::Completed);
    assert!(upload_path.exists());

    // After the timestamp it completes and the directory is gone.
    let done = wait_for(Duration::from_secs(10), || async {
        task_status(&db.pool, task.id).await == TaskStatus::Completed
    })
    .await;
    assert!(done, "task should complete after its timestamp");
    assert!(!upload_path.exists());

    let row = tasks::get_task(&db.pool, task.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert!(
        row.attempts >= 2,
        "deferral consumes attempts across polls (got {})",
        row.attempts
    );

    cancel.cancel();
    handle.await.expect("join should succeed").expect("scheduler should exit cleanly");
    db.teardown().await;
}

#[tokio::test]
async fn transient_failures_exhaust_the_attempt_budget() {
    let db = TestDb::new().await;

    let provider = Arc::new(
        RecordingProvider::new("dev").with_create_behavior(CreateBehavior::FailTransient),
    );
    let (cancel, handle) = start_scheduler(
        &db.pool,
        provider_registry(Arc::clone(&provider)),
        no_provisioner_registry(),
        test_config(),
    );

    let instance = insert_test_instance(&db.pool, "dev", PayloadStatus::None).await;
    let task = insert_create_task(&db.pool, &instance, false, "", 3).await;

    let done = wait_for(Duration::from_secs(10), || async {
        task_status(&db.pool, task.id).await == TaskStatus::Failed
    })
    .await;
    assert!(done, "task should fail terminally");

    let row = tasks::get_task(&db.pool, task.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(row.attempts, 3);
    assert_eq!(provider.create_calls.load(Ordering::SeqCst), 3);
    assert!(row.error.contains("vendor unavailable"));
    assert!(row.lock_holder.is_none());

    // The failed task never reappears in the schedulable set.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(provider.create_calls.load(Ordering::SeqCst), 3);

    cancel.cancel();
    handle.await.expect("join should succeed").expect("scheduler should exit cleanly");
    db.teardown().await;
}

#[tokio::test]
async fn saturated_low_queue_does_not_starve_high_tasks() {
    let db = TestDb::new().await;

    let provider = Arc::new(RecordingProvider::new("dev"));
    let mut config = test_config();
    config.worker_count = 4;
    config.high_priority_ratio = 0.5;
    let (cancel, handle) = start_scheduler(
        &db.pool,
        provider_registry(Arc::clone(&provider)),
        no_provisioner_registry(),
        config,
    );

    // Saturate the low class with cleanups that will defer forever.
    let far_future = Utc::now() + ChronoDuration::hours(1);
    for i in 0..40 {
        let path = PathBuf::from(format!("/tmp/armada-test-missing-{i}"));
        insert_delete_upload_task(&db.pool, &path, far_future, 1_000_000).await;
    }

    // High-priority lifecycle work must still flow.
    let mut task_ids = Vec::new();
    for _ in 0..8 {
        let instance = insert_test_instance(&db.pool, "dev", PayloadStatus::None).await;
        let task = insert_create_task(&db.pool, &instance, false, "", 3).await;
        task_ids.push(task.id);
    }

    let done = wait_for(Duration::from_secs(15), || async {
        let mut all = true;
        for id in &task_ids {
            if task_status(&db.pool, *id).await != TaskStatus::Completed {
                all = false;
                break;
            }
        }
        all
    })
    .await;
    assert!(done, "high-priority tasks should complete despite low-queue churn");

    cancel.cancel();
    handle.await.expect("join should succeed").expect("scheduler should exit cleanly");
    db.teardown().await;
}

#[tokio::test]
async fn shutdown_leaves_inflight_task_to_recovery() {
    let db = TestDb::new().await;

    let provider =
        Arc::new(RecordingProvider::new("dev").with_create_behavior(CreateBehavior::Hang));
    let (cancel, handle) = start_scheduler(
        &db.pool,
        provider_registry(Arc::clone(&provider)),
        no_provisioner_registry(),
        test_config(),
    );

    let instance = insert_test_instance(&db.pool, "dev", PayloadStatus::None).await;
    let task = insert_create_task(&db.pool, &instance, false, "", 3).await;

    // Wait until a worker has leased the task and is stuck in the vendor
    // call.
    let running = wait_for(Duration::from_secs(10), || async {
        task_status(&db.pool, task.id).await == TaskStatus::Running
    })
    .await;
    assert!(running, "task should be in flight");

    cancel.cancel();
    handle.await.expect("join should succeed").expect("scheduler should exit cleanly");

    // Cancellation recorded nothing: no terminal write, lease left in
    // place for expiry.
    let row = tasks::get_task(&db.pool, task.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(row.status, TaskStatus::Running);
    assert!(row.lock_holder.is_some());
    assert!(row.error.is_empty());

    // Next boot: the lease has expired and recovery reclaims the task.
    sqlx::query("UPDATE tasks SET lock_expires_at = now() - interval '60 seconds' WHERE id = $1")
        .bind(task.id)
        .execute(&db.pool)
        .await
        .expect("backdate should succeed");
    let recovered = tasks::recover_stale(&db.pool)
        .await
        .expect("recovery should succeed");
    assert_eq!(recovered, 1);
    assert_eq!(task_status(&db.pool, task.id).await, TaskStatus::Pending);

    db.teardown().await;
}

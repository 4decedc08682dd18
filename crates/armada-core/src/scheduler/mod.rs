//! The scheduler: two poll-driven dispatchers feeding a worker pool
//! partitioned by priority class, plus the stale-lease recovery loop.
//!
//! Priority isolation is structural: high-priority workers never service
//! the low queue and vice versa, so a flood of best-effort cleanups cannot
//! crowd out instance lifecycle work. The cost is possible starvation of
//! the low class, acceptable because it only carries cleanups.

mod dispatcher;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use armada_db::models::TaskPriority;
use armada_db::queries::tasks;

use crate::handlers::HandlerContext;
use crate::registry::{ProviderRegistry, ProvisionerRegistry};
use crate::webhook::WebhookNotifier;
use dispatcher::DispatcherConfig;
use worker::WorkerContext;

/// Construct-time scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Total number of workers across both priority classes.
    pub worker_count: usize,
    /// Fraction of workers assigned to the high-priority queue, in (0, 1].
    pub high_priority_ratio: f64,
    /// Dispatcher delay after a poll that returned work.
    pub poll_interval: Duration,
    /// Dispatcher delay after an empty poll or a database error.
    pub backoff: Duration,
    /// Task lease TTL. Sized to a small multiple of the longest vendor
    /// call, so a dead worker's lease expires promptly.
    pub lease_ttl: Duration,
    /// Maximum tasks fetched per dispatcher poll.
    pub dispatcher_batch_size: i64,
    /// Capacity of each priority queue.
    pub queue_capacity: usize,
    /// Period of the stale-lease recovery scan.
    pub recovery_interval: Duration,
    /// Private key handed to provisioners; only used when tasks request
    /// provisioning.
    pub ssh_key_path: PathBuf,
    /// When set, delete-upload tasks may only remove paths under this root.
    pub uploads_root: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 100,
            high_priority_ratio: 0.7,
            poll_interval: Duration::from_secs(1),
            backoff: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(600),
            dispatcher_batch_size: 10,
            queue_capacity: 100,
            recovery_interval: Duration::from_secs(60),
            ssh_key_path: PathBuf::new(),
            uploads_root: None,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            bail!("worker_count must be at least 1");
        }
        if !(self.high_priority_ratio > 0.0 && self.high_priority_ratio <= 1.0) {
            bail!(
                "high_priority_ratio must be in (0, 1], got {}",
                self.high_priority_ratio
            );
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.dispatcher_batch_size <= 0 {
            bail!("dispatcher_batch_size must be at least 1");
        }
        Ok(())
    }

    /// Number of workers serving the high-priority queue.
    pub fn high_worker_count(&self) -> usize {
        ((self.worker_count as f64) * self.high_priority_ratio).floor() as usize
    }
}

/// The scheduler runtime. Owns the pool handle, the capability registries,
/// and the configuration; [`Scheduler::run`] drives everything until the
/// cancellation token fires.
pub struct Scheduler {
    pool: PgPool,
    providers: Arc<ProviderRegistry>,
    provisioners: Arc<ProvisionerRegistry>,
    webhooks: Arc<WebhookNotifier>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        providers: Arc<ProviderRegistry>,
        provisioners: Arc<ProvisionerRegistry>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate().context("invalid scheduler configuration")?;
        let webhooks = Arc::new(WebhookNotifier::new()?);
        Ok(Self {
            pool,
            providers,
            provisioners,
            webhooks,
            config,
        })
    }

    /// Run dispatchers, workers, and the recovery loop until cancellation.
    ///
    /// Startup begins with a stale-lease scan so tasks orphaned by a crash
    /// re-enter the schedulable set before the first poll.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let recovered = tasks::recover_stale(&self.pool)
            .await
            .context("startup stale-task recovery failed")?;
        if recovered > 0 {
            tracing::info!(count = recovered, "reset stale tasks from previous run");
        }

        let high_workers = self.config.high_worker_count().min(self.config.worker_count);
        let low_workers = self.config.worker_count - high_workers;
        tracing::info!(
            workers = self.config.worker_count,
            high = high_workers,
            low = low_workers,
            lease_ttl_secs = self.config.lease_ttl.as_secs(),
            "scheduler starting"
        );

        let (high_tx, high_rx) = mpsc::channel(self.config.queue_capacity);
        let (low_tx, low_rx) = mpsc::channel(self.config.queue_capacity);

        let mut join_set: JoinSet<()> = JoinSet::new();

        for (priority, queue) in [(TaskPriority::High, high_tx), (TaskPriority::Low, low_tx)] {
            let config = DispatcherConfig {
                priority,
                batch_size: self.config.dispatcher_batch_size,
                poll_interval: self.config.poll_interval,
                backoff: self.config.backoff,
            };
            join_set.spawn(dispatcher::run_dispatcher(
                self.pool.clone(),
                config,
                queue,
                cancel.clone(),
            ));
        }

        join_set.spawn(run_recovery_loop(
            self.pool.clone(),
            self.config.recovery_interval,
            cancel.clone(),
        ));

        let handler_ctx = Arc::new(HandlerContext {
            pool: self.pool.clone(),
            providers: Arc::clone(&self.providers),
            provisioners: Arc::clone(&self.provisioners),
            ssh_key_path: self.config.ssh_key_path.clone(),
            uploads_root: self.config.uploads_root.clone(),
        });

        let high_rx = Arc::new(Mutex::new(high_rx));
        let low_rx = Arc::new(Mutex::new(low_rx));

        for i in 0..self.config.worker_count {
            let (priority, queue) = if i < high_workers {
                (TaskPriority::High, Arc::clone(&high_rx))
            } else {
                (TaskPriority::Low, Arc::clone(&low_rx))
            };
            let ctx = WorkerContext {
                pool: self.pool.clone(),
                worker_id: format!("{priority}-worker-{i}"),
                lease_ttl: self.config.lease_ttl,
                handlers: Arc::clone(&handler_ctx),
                webhooks: Arc::clone(&self.webhooks),
            };
            join_set.spawn(worker::run_worker(ctx, queue, cancel.clone()));
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "scheduler task panicked");
            }
        }

        tracing::info!("scheduler stopped");
        Ok(())
    }
}

/// Periodically reset `running` tasks whose lease expired (worker died
/// mid-flight or was cancelled at shutdown).
async fn run_recovery_loop(pool: PgPool, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        match tasks::recover_stale(&pool).await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "reset stale tasks"),
            Err(err) => tracing::warn!(error = %err, "stale-task recovery failed"),
        }
    }
}

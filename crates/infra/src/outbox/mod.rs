//! Transactional outbox dispatcher.
//!
//! ## Design
//!
//! - Use cases enqueue jobs with [`Outbox::put`] inside their own write
//!   transaction, so a job exists iff the business write committed.
//! - [`Outbox::run`] spawns a fixed set of workers. Each worker reserves one
//!   job at a time (lease + attempt counter, in a short transaction), runs its
//!   handler under a timeout and then deletes the row or dead-letters it.
//! - Exclusion between workers lives in the job table, not in this process:
//!   several processes may run dispatchers against the same database.
//!
//! ## Outcomes per reserved job
//!
//! | Situation | Result |
//! |-----------|--------|
//! | handler ok | row deleted |
//! | no handler under that name | dead-lettered `not_found` |
//! | handler failed, attempts < max | row kept, retried once the lease expires |
//! | handler failed, attempts >= max | dead-lettered `too_many_errors` |
//!
//! Panics and timeouts count as handler failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parley_core::JobId;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::jobs::JobError;
use crate::store::{JobRepository, Store, StoreError, Transactor, Tx};

pub mod registry;
pub mod types;

pub use registry::{DEFAULT_EXECUTION_TIMEOUT, DEFAULT_MAX_ATTEMPTS, JobHandler, JobRegistry};
pub use types::{FailReason, FailedJob, Job};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("job already exists: {0}")]
    JobAlreadyExists(String),

    #[error("invalid outbox config: {0}")]
    InvalidConfig(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct OutboxSettings {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Sleep between polls when no job is eligible.
    pub idle_time: Duration,
    /// Lease taken on each reservation.
    pub reserve_for: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            idle_time: Duration::from_secs(1),
            reserve_for: Duration::from_secs(300),
        }
    }
}

impl OutboxSettings {
    pub fn validate(&self) -> Result<(), OutboxError> {
        if !(1..=32).contains(&self.workers) {
            return Err(OutboxError::InvalidConfig(format!(
                "workers must be in 1..=32, got {}",
                self.workers
            )));
        }
        if !(Duration::from_millis(100)..=Duration::from_secs(10)).contains(&self.idle_time) {
            return Err(OutboxError::InvalidConfig(format!(
                "idle_time must be in 100ms..=10s, got {:?}",
                self.idle_time
            )));
        }
        if !(Duration::from_secs(1)..=Duration::from_secs(600)).contains(&self.reserve_for) {
            return Err(OutboxError::InvalidConfig(format!(
                "reserve_for must be in 1s..=10m, got {:?}",
                self.reserve_for
            )));
        }
        Ok(())
    }
}

/// Durable background work queue with a fixed worker pool.
pub struct Outbox {
    store: Arc<dyn Store>,
    registry: JobRegistry,
    settings: OutboxSettings,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Outbox {
    pub fn new(store: Arc<dyn Store>, settings: OutboxSettings) -> Self {
        Self {
            store,
            registry: JobRegistry::new(),
            settings,
        }
    }

    /// Register a handler. Fails if the name is taken.
    pub fn register_job(&mut self, handler: Arc<dyn JobHandler>) -> Result<(), OutboxError> {
        info!(job = handler.name(), "registering outbox job");
        self.registry.register(handler)
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Enqueue a job through `repo`, normally the caller's open transaction.
    pub async fn put<R>(
        &self,
        repo: &R,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> Result<JobId, OutboxError>
    where
        R: JobRepository + ?Sized,
    {
        let id = repo.create_job(name, payload, available_at).await?;
        debug!(job_id = %id, job = name, payload, "job enqueued");
        Ok(id)
    }

    /// Run the workers until `cancel` fires, then wait for them to finish
    /// their in-flight job.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), OutboxError> {
        self.settings.validate()?;
        let lease = self.lease()?;

        info!(
            workers = self.settings.workers,
            jobs = ?self.registry.names(),
            "outbox started"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.workers {
            let outbox = Arc::clone(&self);
            let cancel = cancel.clone();
            workers.spawn(async move { outbox.worker(worker_id, lease, cancel).await });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "outbox worker aborted");
            }
        }

        info!("outbox stopped");
        Ok(())
    }

    async fn worker(&self, worker_id: usize, lease: TimeDelta, cancel: CancellationToken) {
        debug!(worker_id, "outbox worker started");

        while !cancel.is_cancelled() {
            match self.process_next(worker_id, lease).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(worker_id, error = %e, "outbox iteration failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.idle_time) => {}
            }
        }

        debug!(worker_id, "outbox worker stopped");
    }

    /// Process at most one eligible job on the caller's task.
    /// `Ok(false)` means nothing was eligible.
    pub async fn run_once(&self) -> Result<bool, OutboxError> {
        self.process_next(0, self.lease()?).await
    }

    fn lease(&self) -> Result<TimeDelta, OutboxError> {
        TimeDelta::from_std(self.settings.reserve_for)
            .map_err(|e| OutboxError::InvalidConfig(e.to_string()))
    }

    async fn process_next(
        &self,
        worker_id: usize,
        lease: TimeDelta,
    ) -> Result<bool, OutboxError> {
        let Some(job) = self.reserve(Utc::now() + lease).await? else {
            return Ok(false);
        };

        let Some(handler) = self.registry.get(&job.name) else {
            warn!(worker_id, job = %job.name, payload = %job.payload, "no handler registered");
            self.dead_letter(&job, FailReason::NotFound).await?;
            return Ok(true);
        };

        match execute(Arc::clone(&handler), &job.payload).await {
            Ok(()) => {
                self.store.delete_job(job.id).await?;
                debug!(worker_id, job = %job.name, attempts = job.attempts, "job done");
            }
            Err(e) if job.attempts >= handler.max_attempts() => {
                warn!(
                    worker_id,
                    job = %job.name,
                    payload = %job.payload,
                    attempts = job.attempts,
                    error = %e,
                    "job failed for the last time"
                );
                self.dead_letter(&job, FailReason::TooManyErrors).await?;
            }
            Err(e) => {
                warn!(
                    worker_id,
                    job = %job.name,
                    payload = %job.payload,
                    attempts = job.attempts,
                    error = %e,
                    "job failed, will retry"
                );
            }
        }

        Ok(true)
    }

    async fn reserve(&self, until: DateTime<Utc>) -> Result<Option<Job>, OutboxError> {
        let tx = self.store.begin().await?;
        let job = tx.find_and_reserve_job(until).await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn dead_letter(&self, job: &Job, reason: FailReason) -> Result<(), OutboxError> {
        let tx = self.store.begin().await?;
        tx.create_failed_job(&job.name, &job.payload, reason).await?;
        tx.delete_job(job.id).await?;
        tx.commit().await?;
        info!(job = %job.name, job_id = %job.id, %reason, "job dead-lettered");
        Ok(())
    }
}

/// Run the handler on its own task so a panic surfaces as a `JoinError`.
async fn execute(handler: Arc<dyn JobHandler>, payload: &str) -> Result<(), JobError> {
    let timeout = handler.execution_timeout();
    let payload = payload.to_string();
    let task = tokio::spawn(async move { handler.handle(&payload).await });
    let abort = task.abort_handle();

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(JobError::Panicked(join.to_string())),
        Err(_) => {
            abort.abort();
            Err(JobError::Timeout(timeout))
        }
    }
}

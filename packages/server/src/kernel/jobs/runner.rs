//! Job runner service for processing background jobs.
//!
//! The `JobRunner` is a background service that:
//! - Waits for ready jobs (push notification, next due time, or poll interval)
//! - Executes them via the registry with bounded concurrency
//! - Applies a per-job execution timeout
//! - Reports success/failure back to the queue, which owns retries
//!
//! # Architecture
//!
//! ```text
//! JobRunner
//!     │
//!     ├─► acquire concurrency permit
//!     ├─► claim one job (JobQueue)
//!     ├─► spawn: JobRegistry.execute(record, child token)
//!     │       └─► JobHandler<J>.execute(job, cancel)
//!     └─► mark succeeded/failed (JobQueue handles retries)
//!
//! shutdown token cancelled
//!     └─► stop claiming, cancel in-flight jobs, wait up to grace period
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{ErrorKind, JobRecord};
use super::queue::JobQueue;
use super::registry::{RegistryError, SharedJobRegistry};

/// Errors a handler can return to steer retry classification.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job can never succeed; do not retry.
    #[error("{0}")]
    Permanent(String),

    #[error("job timed out after {0:?}")]
    Timeout(Duration),
}

impl JobError {
    pub fn permanent(message: impl Into<String>) -> anyhow::Error {
        JobError::Permanent(message.into()).into()
    }
}

/// Configuration for the job runner.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Maximum number of jobs executing at once
    pub concurrency: usize,
    /// Upper bound on idle sleep between queue checks
    pub poll_interval: Duration,
    /// Per-job execution timeout
    pub job_timeout: Duration,
    /// How long shutdown waits for in-flight jobs before aborting them
    pub shutdown_grace: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(30),
            worker_id: format!("runner-{}", Uuid::new_v4()),
        }
    }
}

impl JobRunnerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// Background service that processes jobs from the queue.
///
/// Retries are handled by the queue's `mark_failed` implementation; the
/// runner only classifies the error.
pub struct JobRunner {
    job_queue: Arc<dyn JobQueue>,
    registry: SharedJobRegistry,
    config: JobRunnerConfig,
}

impl JobRunner {
    /// Create a new job runner.
    pub fn new(job_queue: Arc<dyn JobQueue>, registry: SharedJobRegistry) -> Self {
        Self::with_config(job_queue, registry, JobRunnerConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(
        job_queue: Arc<dyn JobQueue>,
        registry: SharedJobRegistry,
        config: JobRunnerConfig,
    ) -> Self {
        Self {
            job_queue,
            registry,
            config,
        }
    }

    /// Run until `shutdown` is cancelled, then drain in-flight jobs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            job_timeout_ms = self.config.job_timeout.as_millis() as u64,
            "job runner starting"
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "job task panicked");
                }
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = match self.job_queue.claim(&self.config.worker_id, 1).await {
                Ok(mut jobs) => jobs.pop(),
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

            let Some(job) = job else {
                drop(permit);
                let wait = self.idle_wait().await;
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = self.job_queue.wait_for_work(wait) => {}
                }
                continue;
            };

            let queue = self.job_queue.clone();
            let registry = self.registry.clone();
            let cancel = shutdown.child_token();
            let job_timeout = self.config.job_timeout;
            in_flight.spawn(async move {
                process_job(queue, registry, job, cancel, job_timeout).await;
                drop(permit);
            });
        }

        if !in_flight.is_empty() {
            info!(count = in_flight.len(), "waiting for running jobs to complete");
            let drained = tokio::time::timeout(self.config.shutdown_grace, async {
                while in_flight.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    remaining = in_flight.len(),
                    "grace period elapsed, aborting running jobs"
                );
                in_flight.shutdown().await;
            }
        }

        info!(worker_id = %self.config.worker_id, "job runner stopped");
        Ok(())
    }

    async fn idle_wait(&self) -> Duration {
        match self.job_queue.next_run_time().await {
            Ok(Some(due)) => due
                .saturating_duration_since(Instant::now())
                .min(self.config.poll_interval),
            Ok(None) => self.config.poll_interval,
            Err(e) => {
                warn!(error = %e, "failed to read next run time");
                self.config.poll_interval
            }
        }
    }
}

async fn process_job(
    queue: Arc<dyn JobQueue>,
    registry: SharedJobRegistry,
    job: JobRecord,
    cancel: CancellationToken,
    job_timeout: Duration,
) {
    let handle = job.handle;
    debug!(job_id = %job.job_id, job_type = %job.job_type, "executing job");

    let result = match tokio::time::timeout(job_timeout, registry.execute(&job, cancel.clone())).await
    {
        Ok(result) => result,
        Err(_) => Err(JobError::Timeout(job_timeout).into()),
    };

    match result {
        Ok(()) => {
            debug!(job_id = %job.job_id, job_type = %job.job_type, "job succeeded");
            if let Err(e) = queue.mark_succeeded(handle).await {
                error!(job_id = %job.job_id, error = %e, "failed to mark job as succeeded");
            }
        }
        Err(e) => {
            let error_kind = if cancel.is_cancelled() {
                ErrorKind::Shutdown
            } else {
                classify_error(&e)
            };
            warn!(
                job_id = %job.job_id,
                job_type = %job.job_type,
                retry_count = job.retry_count,
                error_kind = ?error_kind,
                error = %e,
                "job failed"
            );

            if let Err(mark_err) = queue.mark_failed(handle, &format!("{e:#}"), error_kind).await {
                error!(job_id = %job.job_id, error = %mark_err, "failed to mark job as failed");
            }
        }
    }
}

/// Classify an error to determine retry behavior.
///
/// Registry dispatch errors and [`JobError::Permanent`] are non-retryable;
/// everything else (network errors, timeouts) is retried.
pub fn classify_error(error: &anyhow::Error) -> ErrorKind {
    if error.downcast_ref::<RegistryError>().is_some() {
        return ErrorKind::NonRetryable;
    }

    match error.downcast_ref::<JobError>() {
        Some(JobError::Permanent(_)) => ErrorKind::NonRetryable,
        Some(JobError::Timeout(_)) | None => ErrorKind::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{
        InMemoryJobQueue, Job, JobQueueExt, JobRegistry, JobStatus, RetryPolicy,
    };
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct WorkJob {
        id: String,
        fail_times: usize,
    }

    impl Job for WorkJob {
        const JOB_TYPE: &'static str = "work";

        fn job_id(&self) -> String {
            self.id.clone()
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::fixed(3, vec![Duration::from_millis(10)])
        }
    }

    fn config() -> JobRunnerConfig {
        JobRunnerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(20),
            job_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_millis(200),
            worker_id: "test-runner".into(),
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_config_defaults() {
        let config = JobRunnerConfig::default();
        assert_eq!(config.concurrency, 8);
        assert!(config.worker_id.starts_with("runner-"));
    }

    #[test]
    fn test_config_with_worker_id() {
        let config = JobRunnerConfig::with_worker_id("my-runner");
        assert_eq!(config.worker_id, "my-runner");
    }

    #[test]
    fn test_classify_error_retryable() {
        let error = anyhow::anyhow!("connection timeout");
        assert_eq!(classify_error(&error), ErrorKind::Retryable);
        let error: anyhow::Error = JobError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(classify_error(&error), ErrorKind::Retryable);
    }

    #[test]
    fn test_classify_error_permanent() {
        let error = JobError::permanent("order 9 not found");
        assert_eq!(classify_error(&error), ErrorKind::NonRetryable);
        let error: anyhow::Error = RegistryError::UnknownJobType("gone".into()).into();
        assert_eq!(classify_error(&error), ErrorKind::NonRetryable);
    }

    #[tokio::test]
    async fn runs_jobs_and_retries_failures() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut registry = JobRegistry::new();
        let counter = attempts.clone();
        registry
            .register_fn::<WorkJob, _, _>(move |job, _cancel| {
                let counter = counter.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < job.fail_times {
                        anyhow::bail!("transient failure {attempt}");
                    }
                    Ok(())
                }
            })
            .unwrap();

        let shutdown = CancellationToken::new();
        let runner = JobRunner::with_config(queue.clone(), Arc::new(registry), config());
        let task = tokio::spawn(runner.run(shutdown.clone()));

        queue
            .enqueue_job(&WorkJob {
                id: "w1".into(),
                fail_times: 2,
            })
            .await
            .unwrap();

        wait_until(|| queue.stats().succeeded == 1).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(queue.stats().retried, 2);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_job_type_is_dead_lettered_without_retry() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let shutdown = CancellationToken::new();
        let runner = JobRunner::with_config(queue.clone(), Arc::new(JobRegistry::new()), config());
        let task = tokio::spawn(runner.run(shutdown.clone()));

        queue
            .enqueue_job(&WorkJob {
                id: "orphan".into(),
                fail_times: 0,
            })
            .await
            .unwrap();

        wait_until(|| queue.stats().dead_letter == 1).await;
        assert_eq!(queue.stats().retried, 0);
        let dead = queue.dead_letters();
        assert_eq!(dead[0].status, JobStatus::DeadLetter);
        assert_eq!(dead[0].error_kind, Some(ErrorKind::NonRetryable));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_jobs() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let started = Arc::new(AtomicUsize::new(0));

        let mut registry = JobRegistry::new();
        let flag = started.clone();
        registry
            .register_fn::<WorkJob, _, _>(move |_job, cancel| {
                let flag = flag.clone();
                async move {
                    flag.fetch_add(1, Ordering::SeqCst);
                    cancel.cancelled().await;
                    anyhow::bail!("cancelled")
                }
            })
            .unwrap();

        let shutdown = CancellationToken::new();
        let runner = JobRunner::with_config(queue.clone(), Arc::new(registry), config());
        let task = tokio::spawn(runner.run(shutdown.clone()));

        let handle = queue
            .enqueue_job(&WorkJob {
                id: "long".into(),
                fail_times: 0,
            })
            .await
            .unwrap()
            .handle();
        wait_until(|| started.load(Ordering::SeqCst) == 1).await;

        shutdown.cancel();
        task.await.unwrap().unwrap();

        let record = queue.get(handle).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error_kind, Some(ErrorKind::Shutdown));
    }

    #[tokio::test]
    async fn slow_jobs_hit_the_execution_timeout() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let mut registry = JobRegistry::new();
        registry
            .register_fn::<WorkJob, _, _>(|_job, _cancel| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();

        let shutdown = CancellationToken::new();
        let runner = JobRunner::with_config(
            queue.clone(),
            Arc::new(registry),
            JobRunnerConfig {
                job_timeout: Duration::from_millis(50),
                ..config()
            },
        );
        let task = tokio::spawn(runner.run(shutdown.clone()));

        let handle = queue
            .enqueue_job(&WorkJob {
                id: "slow".into(),
                fail_times: 0,
            })
            .await
            .unwrap()
            .handle();

        wait_until(|| queue.stats().retried >= 1).await;
        let record = queue.get(handle).unwrap();
        assert!(record
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("timed out")));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}

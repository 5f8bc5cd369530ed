//! Job queue trait and the in-process implementation.
//!
//! The queue stores [`JobRecord`]s and hands them to the runner in
//! priority-then-due-time order. Framework-managed retries happen in
//! `mark_failed`: a retryable failure with attempts left becomes a new
//! pending record delayed per the job's [`RetryPolicy`].
//!
//! [`RetryPolicy`]: super::job::RetryPolicy

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::job::{ErrorKind, Job, JobHandle, JobRecord, JobStatus};

/// Finished records kept for inspection.
const HISTORY_LIMIT: usize = 1000;

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was enqueued, returns the new handle
    Created(JobHandle),
    /// A pending/running job with the same job id exists, returns its handle
    Duplicate(JobHandle),
}

impl EnqueueResult {
    /// Get the handle regardless of whether it was created or duplicate
    pub fn handle(&self) -> JobHandle {
        match self {
            EnqueueResult::Created(h) | EnqueueResult::Duplicate(h) => *h,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Trait for job queue operations.
///
/// Object safe so it can be shared as `Arc<dyn JobQueue>`; typed helpers
/// live on [`JobQueueExt`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Store a record. Returns `Duplicate` when a live record shares its job id.
    async fn push(&self, record: JobRecord) -> Result<EnqueueResult>;

    /// Remove a pending job. Returns true only if a pending job was removed.
    async fn delete(&self, handle: JobHandle) -> Result<bool>;

    /// Claim up to `limit` ready jobs, marking them running.
    async fn claim(&self, worker_id: &str, limit: usize) -> Result<Vec<JobRecord>>;

    /// Mark a job as successfully completed.
    async fn mark_succeeded(&self, handle: JobHandle) -> Result<()>;

    /// Mark a job as failed with an error.
    ///
    /// If the kind is retryable and retries remain, a retry is queued.
    /// Otherwise the job is dead-lettered (or cancelled).
    async fn mark_failed(&self, handle: JobHandle, error: &str, kind: ErrorKind) -> Result<()>;

    /// Earliest due time among pending jobs (for sleep optimization).
    async fn next_run_time(&self) -> Result<Option<Instant>>;

    /// Wait until new work is pushed or `max_wait` elapses.
    async fn wait_for_work(&self, max_wait: Duration);
}

/// Typed enqueue helpers over any [`JobQueue`].
#[async_trait]
pub trait JobQueueExt: JobQueue {
    /// Enqueue a job for immediate execution.
    async fn enqueue_job<J: Job>(&self, job: &J) -> Result<EnqueueResult> {
        self.push(JobRecord::for_job(job)?).await
    }

    /// Schedule a job to run no earlier than `delay` from now.
    async fn schedule_job<J: Job>(&self, job: &J, delay: Duration) -> Result<EnqueueResult> {
        self.push(JobRecord::scheduled(job, delay)?).await
    }
}

impl<T: JobQueue + ?Sized> JobQueueExt for T {}

/// Counts by status, served on the metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_letter: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobHandle, JobRecord>,
    live_by_job_id: HashMap<String, JobHandle>,
    history: VecDeque<JobRecord>,
    dead_letters: Vec<JobRecord>,
    stats: QueueStats,
}

impl QueueState {
    fn finish(&mut self, mut record: JobRecord, status: JobStatus) {
        if self.live_by_job_id.get(&record.job_id) == Some(&record.handle) {
            self.live_by_job_id.remove(&record.job_id);
        }
        record.status = status;
        record.updated_at = Utc::now();

        match status {
            JobStatus::Succeeded => self.stats.succeeded += 1,
            JobStatus::Failed => self.stats.failed += 1,
            JobStatus::DeadLetter => {
                self.stats.dead_letter += 1;
                self.dead_letters.push(record.clone());
            }
            JobStatus::Cancelled => self.stats.cancelled += 1,
            JobStatus::Pending | JobStatus::Running => {}
        }

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}

/// In-process job queue.
///
/// Durability is delegated: a restart loses pending jobs.
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state();
        let mut stats = state.stats.clone();
        stats.pending = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count();
        stats.running = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        stats
    }

    /// Pending and running records, most urgent first.
    pub fn live_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<_> = self
            .state()
            .jobs
            .values()
            .filter(|j| j.status.is_live())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.priority.as_i16(), j.run_at));
        jobs
    }

    /// Live records of one job type.
    pub fn jobs_of_type(&self, job_type: &str) -> Vec<JobRecord> {
        self.live_jobs()
            .into_iter()
            .filter(|j| j.job_type == job_type)
            .collect()
    }

    pub fn get(&self, handle: JobHandle) -> Option<JobRecord> {
        let state = self.state();
        state
            .jobs
            .get(&handle)
            .or_else(|| state.history.iter().rev().find(|j| j.handle == handle))
            .cloned()
    }

    /// Finished records, oldest first.
    pub fn history(&self) -> Vec<JobRecord> {
        self.state().history.iter().cloned().collect()
    }

    pub fn dead_letters(&self) -> Vec<JobRecord> {
        self.state().dead_letters.clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, record: JobRecord) -> Result<EnqueueResult> {
        let mut state = self.state();
        if let Some(existing) = state.live_by_job_id.get(&record.job_id) {
            debug!(job_id = %record.job_id, handle = %existing, "job already queued");
            return Ok(EnqueueResult::Duplicate(*existing));
        }

        debug!(
            job_id = %record.job_id,
            job_type = %record.job_type,
            handle = %record.handle,
            "job queued"
        );
        let handle = record.handle;
        state.live_by_job_id.insert(record.job_id.clone(), handle);
        state.jobs.insert(handle, record);
        drop(state);

        self.notify.notify_one();
        Ok(EnqueueResult::Created(handle))
    }

    async fn delete(&self, handle: JobHandle) -> Result<bool> {
        let mut state = self.state();
        let is_pending = state
            .jobs
            .get(&handle)
            .is_some_and(|j| j.status == JobStatus::Pending);
        if !is_pending {
            return Ok(false);
        }

        if let Some(record) = state.jobs.remove(&handle) {
            info!(job_id = %record.job_id, handle = %handle, "pending job deleted");
            state.finish(record, JobStatus::Cancelled);
        }
        Ok(true)
    }

    async fn claim(&self, worker_id: &str, limit: usize) -> Result<Vec<JobRecord>> {
        let now = Instant::now();
        let mut state = self.state();

        let mut ready: Vec<(i16, Instant, JobHandle)> = state
            .jobs
            .values()
            .filter(|j| j.is_ready(now))
            .map(|j| (j.priority.as_i16(), j.run_at, j.handle))
            .collect();
        ready.sort();

        let mut claimed = Vec::with_capacity(limit.min(ready.len()));
        for (_, _, handle) in ready.into_iter().take(limit) {
            if let Some(job) = state.jobs.get_mut(&handle) {
                job.status = JobStatus::Running;
                job.worker_id = Some(worker_id.to_string());
                job.updated_at = Utc::now();
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_succeeded(&self, handle: JobHandle) -> Result<()> {
        let mut state = self.state();
        let record = state
            .jobs
            .remove(&handle)
            .ok_or_else(|| anyhow!("job {} not found", handle))?;
        state.finish(record, JobStatus::Succeeded);
        Ok(())
    }

    async fn mark_failed(&self, handle: JobHandle, error: &str, kind: ErrorKind) -> Result<()> {
        let mut state = self.state();
        let mut record = state
            .jobs
            .remove(&handle)
            .ok_or_else(|| anyhow!("job {} not found", handle))?;
        record.error_message = Some(error.to_string());
        record.error_kind = Some(kind);

        if kind.should_retry() && record.retries_remaining() {
            let delay = record.retry_policy.delay_for(record.retry_count);
            let retry = record.create_retry(Instant::now() + delay);
            info!(
                job_id = %record.job_id,
                job_type = %record.job_type,
                retry_count = retry.retry_count,
                delay_ms = delay.as_millis() as u64,
                "job failed, retry scheduled"
            );

            let retry_handle = retry.handle;
            state.finish(record, JobStatus::Failed);
            state.stats.retried += 1;
            state
                .live_by_job_id
                .insert(retry.job_id.clone(), retry_handle);
            state.jobs.insert(retry_handle, retry);
            drop(state);
            self.notify.notify_one();
        } else if kind == ErrorKind::Cancelled {
            state.finish(record, JobStatus::Cancelled);
        } else {
            warn!(
                job_id = %record.job_id,
                job_type = %record.job_type,
                retry_count = record.retry_count,
                error,
                "job moved to dead letter"
            );
            state.finish(record, JobStatus::DeadLetter);
        }
        Ok(())
    }

    async fn next_run_time(&self) -> Result<Option<Instant>> {
        Ok(self
            .state()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.run_at)
            .min())
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}

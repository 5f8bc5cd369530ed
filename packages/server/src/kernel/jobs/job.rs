//! Job model for background work.
//!
//! A job type is a Rust struct implementing [`Job`]; its `JOB_TYPE` constant
//! is the only thing the registry uses to find the handler. The queue stores
//! the serialized payload inside a [`JobRecord`] envelope.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Opaque handle returned by enqueue/schedule, accepted by delete.
pub type JobHandle = Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
    Cancelled,
}

impl JobStatus {
    /// Pending or running. A live record blocks another with the same job id.
    pub fn is_live(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Integer form used for ordering (lower = more urgent)
    pub fn as_i16(&self) -> i16 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Job was cancelled by user/system
    Cancelled,
    /// Job was interrupted by graceful shutdown - will retry
    Shutdown,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Framework-managed retry: up to `max_retries` re-runs, waiting
/// `delays[retry_count]` before each (the last delay repeats).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delays: vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(60),
            ],
        }
    }
}

impl RetryPolicy {
    /// No framework retries. Used by handlers that reschedule themselves.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delays: Vec::new(),
        }
    }

    pub fn fixed(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_retries,
            delays,
        }
    }

    /// Delay before the retry following `retry_count` previous retries.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.delays
            .get(retry_count as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

// ============================================================================
// Job trait
// ============================================================================

/// A unit of background work.
///
/// `job_id` is the idempotency key: while a record with the same id is
/// pending or running, enqueueing another is a no-op that returns the
/// existing handle.
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registry key. Must be unique across job types.
    const JOB_TYPE: &'static str;

    fn job_id(&self) -> String;

    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}

// ============================================================================
// Job record
// ============================================================================

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobRecord {
    #[builder(default = Uuid::now_v7())]
    pub handle: JobHandle,

    // Identity
    pub job_id: String,
    pub job_type: String,

    // Payload
    pub args: serde_json::Value,

    // Policies
    #[builder(default)]
    pub priority: JobPriority,
    #[builder(default)]
    pub retry_policy: RetryPolicy,
    #[builder(default = 0)]
    pub retry_count: u32,

    // Scheduling
    #[builder(default = Instant::now())]
    pub run_at: Instant,
    #[builder(default, setter(strip_option))]
    pub schedule_id: Option<String>,

    // State
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_kind: Option<ErrorKind>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Wrap a typed job for immediate execution.
    pub fn for_job<J: Job>(job: &J) -> Result<Self> {
        let args = serde_json::to_value(job)
            .with_context(|| format!("failed to serialize {}", J::JOB_TYPE))?;

        Ok(Self::builder()
            .job_id(job.job_id())
            .job_type(J::JOB_TYPE)
            .args(args)
            .priority(job.priority())
            .retry_policy(job.retry_policy())
            .build())
    }

    /// Wrap a typed job to run no earlier than `delay` from now.
    pub fn scheduled<J: Job>(job: &J, delay: Duration) -> Result<Self> {
        let mut record = Self::for_job(job)?;
        record.run_at = Instant::now() + delay;
        Ok(record)
    }

    /// Decode the payload back into its job type.
    pub fn payload<J: Job>(&self) -> Result<J> {
        serde_json::from_value(self.args.clone())
            .with_context(|| format!("failed to deserialize {} payload", self.job_type))
    }

    /// Check if the job is ready to run
    pub fn is_ready(&self, now: Instant) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.retry_policy.max_retries
    }

    /// Fresh pending copy for the next framework-managed retry.
    pub fn create_retry(&self, run_at: Instant) -> Self {
        Self {
            handle: Uuid::now_v7(),
            job_id: self.job_id.clone(),
            job_type: self.job_type.clone(),
            args: self.args.clone(),
            priority: self.priority,
            retry_policy: self.retry_policy.clone(),
            retry_count: self.retry_count + 1,
            run_at,
            schedule_id: self.schedule_id.clone(),
            status: JobStatus::Pending,
            worker_id: None,
            error_message: None,
            error_kind: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PingJob {
        target: String,
    }

    impl Job for PingJob {
        const JOB_TYPE: &'static str = "ping";

        fn job_id(&self) -> String {
            format!("ping:{}", self.target)
        }

        fn priority(&self) -> JobPriority {
            JobPriority::High
        }
    }

    #[test]
    fn record_carries_job_metadata() {
        let job = PingJob {
            target: "kitchen".into(),
        };
        let record = JobRecord::for_job(&job).unwrap();

        assert_eq!(record.job_type, "ping");
        assert_eq!(record.job_id, "ping:kitchen");
        assert_eq!(record.priority, JobPriority::High);
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.payload::<PingJob>().unwrap(), job);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_record_is_not_ready_before_delay() {
        let job = PingJob { target: "bar".into() };
        let record = JobRecord::scheduled(&job, Duration::from_secs(60)).unwrap();

        assert!(!record.is_ready(Instant::now()));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(record.is_ready(Instant::now()));
    }

    #[test]
    fn retry_copy_increments_count_and_keeps_identity() {
        let record = JobRecord::for_job(&PingJob { target: "a".into() }).unwrap();
        let retry = record.create_retry(Instant::now());

        assert_ne!(retry.handle, record.handle);
        assert_eq!(retry.job_id, record.job_id);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.status, JobStatus::Pending);
    }

    #[test]
    fn delay_schedule_repeats_last_entry() {
        let policy = RetryPolicy::fixed(
            5,
            vec![Duration::from_secs(10), Duration::from_secs(30)],
        );
        assert_eq!(policy.delay_for(0), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(RetryPolicy::none().delay_for(0), Duration::ZERO);
    }

    #[test]
    fn retryable_error_should_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(ErrorKind::Shutdown.should_retry());
    }

    #[test]
    fn non_retryable_error_should_not_retry() {
        assert!(!ErrorKind::NonRetryable.should_retry());
        assert!(!ErrorKind::Cancelled.should_retry());
    }

    #[test]
    fn priority_ordering_is_correct() {
        assert!(JobPriority::Critical.as_i16() < JobPriority::High.as_i16());
        assert!(JobPriority::High.as_i16() < JobPriority::Normal.as_i16());
        assert!(JobPriority::Normal.as_i16() < JobPriority::Low.as_i16());
    }
}

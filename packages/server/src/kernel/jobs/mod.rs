//! Job infrastructure for background work.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`Job`] - typed job trait, paired with exactly one handler via `JOB_TYPE`
//! - [`JobQueue`] / [`InMemoryJobQueue`] - enqueue, schedule, delete, claim
//! - [`JobRegistry`] - job type → [`JobHandler`] resolution
//! - [`JobRunner`] - long-running worker with bounded concurrency
//! - [`RecurringJobs`] - cron schedules that enqueue template copies
//!
//! # Architecture
//!
//! ```text
//! Domain code calls queue.enqueue_job(&job) / schedule_job(&job, delay)
//!     │
//!     └─► JobRecord { job_id, job_type, args, priority, retry policy }
//!
//! JobRunner
//!     │
//!     ├─► Claim ready records (priority, then due time)
//!     ├─► JobRegistry.execute(record, cancel)
//!     │       └─► JobHandler<J>.execute(job, cancel)
//!     └─► Mark succeeded/failed (queue schedules framework retries)
//! ```
//!
//! # Domain-Specific Jobs
//!
//! Jobs and handlers live in their respective domains.
//! This module only provides the infrastructure - business logic stays in domains.

mod job;
mod queue;
pub mod recurring;
mod registry;
mod runner;

pub use job::{ErrorKind, Job, JobHandle, JobPriority, JobRecord, JobStatus, RetryPolicy};
pub use queue::{EnqueueResult, InMemoryJobQueue, JobQueue, JobQueueExt, QueueStats};
pub use recurring::RecurringJobs;
pub use registry::{JobHandler, JobRegistry, RegistryError, SharedJobRegistry};
pub use runner::{classify_error, JobError, JobRunner, JobRunnerConfig};

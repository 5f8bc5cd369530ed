//! Cron-driven recurring jobs using tokio-cron-scheduler.
//!
//! A recurring definition is a schedule id, a template job and a cron
//! expression. Each tick pushes a copy of the template onto the job queue,
//! so recurring work goes through the same registry, retry and concurrency
//! path as everything else.
//!
//! ```text
//! Scheduler (cron tick)
//!     │
//!     └─► JobQueue.push(template copy, job_id = "{schedule_id}@{tick}")
//!             └─► JobRunner → JobRegistry → handler
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

use super::job::{Job, JobRecord};
use super::queue::JobQueue;

/// Accept standard 5-field cron (minute precision) as well as the
/// scheduler's native 6-field form with a leading seconds field.
pub fn normalize_cron(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => bail!("cron expression {:?} has {} fields, expected 5 or 6", expression, n),
    }
}

/// Registry of recurring schedules, keyed by schedule id.
pub struct RecurringJobs {
    scheduler: JobScheduler,
    queue: Arc<dyn JobQueue>,
    entries: Mutex<HashMap<String, Uuid>>,
}

impl RecurringJobs {
    pub async fn new(queue: Arc<dyn JobQueue>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("failed to create cron scheduler")?;
        Ok(Self {
            scheduler,
            queue,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Create or replace the schedule `schedule_id`.
    ///
    /// Re-registering replaces both the cron expression and the template
    /// payload. An invalid expression leaves any existing definition in place.
    pub async fn add_recurring<J: Job>(&self, schedule_id: &str, job: &J, cron: &str) -> Result<()> {
        let cron = normalize_cron(cron)?;
        let mut template = JobRecord::for_job(job)?;
        template.schedule_id = Some(schedule_id.to_string());

        let queue = self.queue.clone();
        let tick_schedule_id = schedule_id.to_string();
        let cron_job = CronJob::new_async(cron.as_str(), move |_uuid, _lock| {
            let queue = queue.clone();
            let template = template.clone();
            let schedule_id = tick_schedule_id.clone();
            Box::pin(async move {
                if let Err(e) = enqueue_tick(queue.as_ref(), &schedule_id, template).await {
                    error!(schedule_id = %schedule_id, error = %e, "failed to enqueue recurring job");
                }
            })
        })
        .with_context(|| format!("invalid cron expression {:?}", cron))?;

        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.remove(schedule_id) {
            self.scheduler
                .remove(&previous)
                .await
                .with_context(|| format!("failed to replace schedule {}", schedule_id))?;
        }
        let id = self.scheduler.add(cron_job).await?;
        entries.insert(schedule_id.to_string(), id);

        info!(
            schedule_id,
            job_type = J::JOB_TYPE,
            cron = %cron,
            "recurring job registered"
        );
        Ok(())
    }

    /// Remove a schedule. Returns false if it was not registered.
    pub async fn remove_recurring(&self, schedule_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let Some(id) = entries.remove(schedule_id) else {
            return Ok(false);
        };
        self.scheduler.remove(&id).await?;
        info!(schedule_id, "recurring job removed");
        Ok(true)
    }

    pub async fn schedule_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        Ok(())
    }
}

async fn enqueue_tick(queue: &dyn JobQueue, schedule_id: &str, template: JobRecord) -> Result<()> {
    let tick = Utc::now().timestamp();
    let mut record = JobRecord {
        handle: Uuid::now_v7(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        run_at: tokio::time::Instant::now(),
        ..template
    };
    record.job_id = format!("{}@{}", schedule_id, tick);

    let result = queue.push(record).await?;
    tracing::debug!(schedule_id, handle = %result.handle(), created = result.is_created(), "recurring tick");
    Ok(())
}

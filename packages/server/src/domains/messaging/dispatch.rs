//! Webhook dedup and dispatch.
//!
//! Every inbound event is keyed by its message id. The key is claimed in the
//! dedup store before the job is enqueued, so a redelivery that races the
//! first one is dropped at the store rather than processed twice.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::jobs::ProcessIncomingMessageJob;
use super::models::InboundMessage;
use crate::kernel::jobs::{JobHandle, JobQueue, JobQueueExt};
use crate::kernel::BaseDedupStore;

/// How long a message id is remembered.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Enqueued(JobHandle),
    /// Seen within the TTL; nothing was done.
    Duplicate,
    /// The key was claimed but the job could not be enqueued.
    Dropped,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    dedup: Arc<dyn BaseDedupStore>,
    jobs: Arc<dyn JobQueue>,
    ttl: Duration,
}

impl WebhookDispatcher {
    pub fn new(dedup: Arc<dyn BaseDedupStore>, jobs: Arc<dyn JobQueue>) -> Self {
        Self {
            dedup,
            jobs,
            ttl: DEFAULT_DEDUP_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn accept(&self, message: InboundMessage) -> AcceptOutcome {
        let key = message.dedup_key();

        match self.dedup.set_if_absent(&key, self.ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(message_id = %message.id, "duplicate webhook event ignored");
                return AcceptOutcome::Duplicate;
            }
            // The queue's job-id idempotency still guards live duplicates.
            Err(e) => warn!(message_id = %message.id, error = %e, "dedup store unavailable, enqueuing anyway"),
        }

        let message_id = message.id.clone();
        match self
            .jobs
            .enqueue_job(&ProcessIncomingMessageJob { message })
            .await
        {
            Ok(result) => {
                debug!(message_id = %message_id, handle = %result.handle(), created = result.is_created(), "inbound message enqueued");
                AcceptOutcome::Enqueued(result.handle())
            }
            Err(e) => {
                error!(message_id = %message_id, error = %e, "failed to enqueue inbound message, event dropped");
                AcceptOutcome::Dropped
            }
        }
    }
}

//! Background jobs owned by the messaging domain.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::models::{InboundMessage, OutboundMessage};
use crate::kernel::jobs::{Job, JobPriority, RetryPolicy};

/// Delays between framework retries of an outbound message.
pub const SEND_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

/// Run the dialogue for one inbound customer message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessIncomingMessageJob {
    pub message: InboundMessage,
}

impl Job for ProcessIncomingMessageJob {
    const JOB_TYPE: &'static str = "process_incoming_message";

    fn job_id(&self) -> String {
        self.message.dedup_key()
    }

    fn priority(&self) -> JobPriority {
        JobPriority::High
    }

    /// Dialogue steps are not idempotent; a failed run ends with an apology
    /// instead of a replay.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }
}

/// Deliver one outbound message, retried by the framework on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageJob {
    /// Caller-derived idempotency key.
    pub key: String,
    pub phone: String,
    pub message: OutboundMessage,
    pub max_retries: u32,
}

impl SendMessageJob {
    pub fn new(key: impl Into<String>, phone: impl Into<String>, message: OutboundMessage) -> Self {
        Self {
            key: key.into(),
            phone: phone.into(),
            message,
            max_retries: SEND_RETRY_DELAYS.len() as u32,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Job for SendMessageJob {
    const JOB_TYPE: &'static str = "send_message";

    fn job_id(&self) -> String {
        format!("send:{}", self.key)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, SEND_RETRY_DELAYS.to_vec())
    }
}

/// Re-read breaker tuning from settings and apply it if it changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshBreakerSettingsJob {}

impl Job for RefreshBreakerSettingsJob {
    const JOB_TYPE: &'static str = "refresh_breaker_settings";

    fn job_id(&self) -> String {
        Self::JOB_TYPE.to_string()
    }

    fn priority(&self) -> JobPriority {
        JobPriority::Low
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::messaging::models::InboundContent;

    #[test]
    fn incoming_job_is_keyed_by_message_id() {
        let job = ProcessIncomingMessageJob {
            message: InboundMessage {
                id: "wamid.1".into(),
                from: "5215550001".into(),
                contact_name: None,
                timestamp: None,
                content: InboundContent::Text { body: "hola".into() },
            },
        };
        assert_eq!(job.job_id(), "inbound:wamid.1");
        assert_eq!(job.retry_policy().max_retries, 0);
    }

    #[test]
    fn send_job_uses_fixed_delays() {
        let job = SendMessageJob::new("reply:wamid.1:0", "5215550001", OutboundMessage::text("hola"))
            .with_max_retries(5);
        let policy = job.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay_for(0), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Duration::from_secs(60));
    }
}

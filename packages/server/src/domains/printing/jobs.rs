//! Print job definition.

use serde::{Deserialize, Serialize};

use crate::kernel::jobs::{Job, JobPriority, RetryPolicy};

/// Print the ticket for one order on a named printer.
///
/// Retries are managed by the handler: each failed attempt schedules a copy
/// with `retry_count + 1`, so the framework never retries this job itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintTicketJob {
    pub order_id: i64,
    pub printer_name: String,
    pub print_duplicate: bool,
    #[serde(default)]
    pub retry_count: u32,
}

impl PrintTicketJob {
    pub fn new(order_id: i64, printer_name: impl Into<String>, print_duplicate: bool) -> Self {
        Self {
            order_id,
            printer_name: printer_name.into(),
            print_duplicate,
            retry_count: 0,
        }
    }

    /// The copy scheduled after a failed attempt.
    pub fn next_attempt(&self, retry_count: u32) -> Self {
        Self {
            retry_count,
            ..self.clone()
        }
    }
}

impl Job for PrintTicketJob {
    const JOB_TYPE: &'static str = "print_ticket";

    fn job_id(&self) -> String {
        format!(
            "print:{}:{}:{}",
            self.order_id, self.printer_name, self.retry_count
        )
    }

    fn priority(&self) -> JobPriority {
        JobPriority::High
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }
}

//! Retry decision for failed print attempts.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Schedule another attempt carrying `retry_count` after `delay`.
    Retry { retry_count: u32, delay: Duration },
    /// Retries are exhausted; escalate and stop.
    GiveUp,
}

impl NextAction {
    pub fn is_final(&self) -> bool {
        matches!(self, NextAction::GiveUp)
    }
}

/// Decide what follows a failed attempt that was itself retry number `retry_count`.
pub fn decide_next_action(retry_count: u32, max_retries: u32, interval: Duration) -> NextAction {
    if retry_count < max_retries {
        NextAction::Retry {
            retry_count: retry_count + 1,
            delay: interval,
        }
    } else {
        NextAction::GiveUp
    }
}

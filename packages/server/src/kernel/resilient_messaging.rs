//! Circuit-breaker decorator around the outbound messaging capability.
//!
//! Every public method returns `bool` or `Option`. Timeouts, open circuits,
//! exhausted retries and downstream errors all collapse to "did not succeed";
//! the difference is only visible in the metrics error type.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use whatsapp::WhatsAppError;

use super::circuit_breaker::{CircuitBreaker, CircuitStatus};
use super::metrics::MetricsCollector;
use super::traits::{BaseMessagingService, ListRow, ReplyButton};

/// Error type recorded when a call is rejected by an open circuit.
pub const CIRCUIT_OPEN_ERROR: &str = "circuit_open";

pub struct ResilientMessagingService {
    inner: Arc<dyn BaseMessagingService>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsCollector>,
}

impl ResilientMessagingService {
    pub fn new(
        inner: Arc<dyn BaseMessagingService>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            inner,
            breaker,
            metrics,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn circuit_status(&self) -> CircuitStatus {
        self.breaker.status()
    }

    pub async fn send_text(&self, phone: &str, body: &str) -> bool {
        self.guarded("send_text", || self.inner.send_text(phone, body))
            .await
            .is_some()
    }

    pub async fn send_buttons(
        &self,
        phone: &str,
        body: &str,
        buttons: &[ReplyButton],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> bool {
        self.guarded("send_buttons", || {
            self.inner.send_buttons(phone, body, buttons, header, footer)
        })
        .await
        .is_some()
    }

    pub async fn send_list(
        &self,
        phone: &str,
        body: &str,
        button_label: &str,
        rows: &[ListRow],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> bool {
        self.guarded("send_list", || {
            self.inner
                .send_list(phone, body, button_label, rows, header, footer)
        })
        .await
        .is_some()
    }

    pub async fn mark_read(&self, message_id: &str) -> bool {
        self.guarded("mark_read", || self.inner.mark_read(message_id))
            .await
            .is_some()
    }

    pub async fn download_media(&self, media_id: &str) -> Option<PathBuf> {
        self.guarded("download_media", || self.inner.download_media(media_id))
            .await
    }

    pub async fn resend(&self, phone: &str, raw_payload: &Value) -> bool {
        self.guarded("resend", || self.inner.resend(phone, raw_payload))
            .await
            .is_some()
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let config = self.breaker.config();
        let attempts = config.max_retries + 1;

        for attempt in 1..=attempts {
            let Some(permit) = self.breaker.try_acquire() else {
                self.metrics
                    .record_failure(operation, Duration::ZERO, CIRCUIT_OPEN_ERROR);
                debug!(
                    breaker = %self.breaker.name(),
                    operation,
                    "circuit open, failing fast"
                );
                return None;
            };

            let started = Instant::now();
            match tokio::time::timeout(config.call_timeout, call()).await {
                Ok(Ok(value)) => {
                    self.metrics.record_success(operation, started.elapsed());
                    self.breaker.on_success(permit);
                    return Some(value);
                }
                Ok(Err(e)) => {
                    let error_type = classify_error(&e);
                    self.metrics
                        .record_failure(operation, started.elapsed(), error_type);
                    self.breaker.on_failure(permit);
                    warn!(operation, attempt, error_type, error = %e, "outbound call failed");
                }
                Err(_) => {
                    self.metrics.record_timeout(operation, started.elapsed());
                    self.breaker.on_failure(permit);
                    warn!(
                        operation,
                        attempt,
                        timeout_ms = config.call_timeout.as_millis() as u64,
                        "outbound call timed out"
                    );
                }
            }

            if attempt < attempts {
                self.metrics.record_retry(operation, attempt);
                tokio::time::sleep(config.retry_delay).await;
            }
        }

        None
    }
}

fn classify_error(error: &anyhow::Error) -> &'static str {
    match error.downcast_ref::<WhatsAppError>() {
        Some(e) => e.kind(),
        None => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::kernel::test_dependencies::MockMessagingService;

    fn breaker(max_retries: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "whatsapp",
            CircuitBreakerConfig {
                failure_ratio: 0.5,
                minimum_throughput: 4,
                break_duration: Duration::from_secs(30),
                call_timeout: Duration::from_secs(2),
                max_retries,
                retry_delay: Duration::from_millis(100),
                ..Default::default()
            },
        ))
    }

    fn service(
        mock: Arc<MockMessagingService>,
        max_retries: u32,
    ) -> (ResilientMessagingService, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new());
        let service = ResilientMessagingService::new(mock, breaker(max_retries), metrics.clone());
        (service, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_recorded() {
        let mock = Arc::new(MockMessagingService::new());
        let (service, metrics) = service(mock.clone(), 0);

        assert!(service.send_text("5215550001", "hola").await);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(mock.sent_texts(), vec![("5215550001".to_string(), "hola".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_become_false_and_are_retried() {
        let mock = Arc::new(MockMessagingService::new());
        mock.set_failing(true);
        let (service, metrics) = service(mock.clone(), 2);

        assert!(!service.send_text("5215550001", "hola").await);
        assert!(!service.mark_read("wamid.1").await);
        assert!(service.download_media("media-1").await.is_none());

        // The mark_read retry found the circuit open; download_media never tried.
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.retries, 3);
        assert_eq!(mock.call_count(), 4, "breaker opened after four failures");
        assert_eq!(service.breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_never_reaches_the_capability() {
        let mock = Arc::new(MockMessagingService::new());
        mock.set_failing(true);
        let (service, metrics) = service(mock.clone(), 0);

        for _ in 0..4 {
            assert!(!service.send_text("5215550001", "hola").await);
        }
        assert_eq!(service.breaker().state(), CircuitState::Open);
        let calls_before = mock.call_count();

        mock.set_failing(false);
        assert!(!service.send_text("5215550001", "hola").await);
        assert!(!service.resend("5215550001", &serde_json::json!({"type": "text"})).await);
        assert_eq!(mock.call_count(), calls_before);

        let snapshot = metrics.snapshot();
        let open = snapshot
            .top_errors
            .iter()
            .find(|e| e.error_type == CIRCUIT_OPEN_ERROR)
            .expect("circuit_open recorded");
        assert_eq!(open.count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_success_closes() {
        let mock = Arc::new(MockMessagingService::new());
        mock.set_failing(true);
        let (service, _metrics) = service(mock.clone(), 0);
        for _ in 0..4 {
            service.send_text("5215550001", "hola").await;
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        mock.set_failing(false);

        assert!(service.send_text("5215550001", "ya volvio").await);
        assert_eq!(service.breaker().state(), CircuitState::Closed);
        assert_eq!(service.circuit_status().samples, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_trial_call_does_not_wedge_the_breaker() {
        let mock = Arc::new(MockMessagingService::new());
        mock.set_failing(true);
        let (service, _metrics) = service(mock.clone(), 0);
        for _ in 0..4 {
            service.send_text("5215550001", "hola").await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        // The trial call is still waiting on the slow dependency when its
        // caller gives up.
        mock.set_failing(false);
        mock.set_delay(Duration::from_secs(5));
        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            service.send_text("5215550001", "hola"),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(service.breaker().state(), CircuitState::Open);

        mock.set_delay(Duration::ZERO);
        tokio::time::advance(Duration::from_secs(30)).await;
        let calls_before = mock.call_count();
        assert!(service.send_text("5215550001", "ya volvio").await);
        assert_eq!(mock.call_count(), calls_before + 1);
        assert_eq!(service.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let mock = Arc::new(MockMessagingService::new());
        mock.set_delay(Duration::from_secs(5));
        let (service, metrics) = service(mock.clone(), 0);

        assert!(!service.send_text("5215550001", "hola").await);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.top_errors[0].error_type, "timeout");
    }
}

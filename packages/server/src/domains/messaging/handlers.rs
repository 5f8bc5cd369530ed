//! Handlers for messaging jobs.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::conversation::ConversationOutcome;
use super::jobs::{
    ProcessIncomingMessageJob, RefreshBreakerSettingsJob, SendMessageJob, SEND_RETRY_DELAYS,
};
use super::models::{InboundMessage, OutboundMessage};
use crate::domains::printing::jobs::PrintTicketJob;
use crate::kernel::jobs::{JobHandler, JobQueueExt, JobRegistry, RegistryError};
use crate::kernel::{ResilientMessagingService, ServerDeps};

/// What the customer sees when their message could not be processed.
pub const APOLOGY_TEXT: &str =
    "Lo sentimos, tuvimos un problema al procesar tu mensaje. Por favor intenta de nuevo en unos minutos.";

/// Deliver one outbound message through the breaker. `false` means not delivered.
pub async fn send_outbound(
    messaging: &ResilientMessagingService,
    phone: &str,
    message: &OutboundMessage,
) -> bool {
    match message {
        OutboundMessage::Text { body } => messaging.send_text(phone, body).await,
        OutboundMessage::Buttons {
            body,
            buttons,
            header,
            footer,
        } => {
            messaging
                .send_buttons(phone, body, buttons, header.as_deref(), footer.as_deref())
                .await
        }
        OutboundMessage::List {
            body,
            button_label,
            rows,
            header,
            footer,
        } => {
            messaging
                .send_list(
                    phone,
                    body,
                    button_label,
                    rows,
                    header.as_deref(),
                    footer.as_deref(),
                )
                .await
        }
        OutboundMessage::Raw { payload } => messaging.resend(phone, payload).await,
    }
}

/// Register every messaging job handler.
pub fn register_messaging_jobs(
    registry: &mut JobRegistry,
    deps: Arc<ServerDeps>,
) -> Result<(), RegistryError> {
    registry.register::<ProcessIncomingMessageJob, _>(ProcessIncomingMessageHandler::new(deps.clone()))?;
    registry.register::<SendMessageJob, _>(SendMessageHandler::new(deps.clone()))?;
    registry.register::<RefreshBreakerSettingsJob, _>(RefreshBreakerSettingsHandler::new(deps))?;
    Ok(())
}

// =============================================================================
// ProcessIncomingMessage
// =============================================================================

pub struct ProcessIncomingMessageHandler {
    deps: Arc<ServerDeps>,
}

impl ProcessIncomingMessageHandler {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }

    /// Replies go out in order on the first attempt. A reply that fails is
    /// handed to a `SendMessage` job so the framework retries it.
    async fn deliver(&self, message: &InboundMessage, outcome: ConversationOutcome) {
        let max_retries = self.deps.settings.message_retry_count().await;

        for (index, reply) in outcome.replies.into_iter().enumerate() {
            if send_outbound(&self.deps.messaging, &message.from, &reply).await {
                continue;
            }

            let job = SendMessageJob::new(
                format!("reply:{}:{}", message.id, index),
                message.from.clone(),
                reply,
            )
            .with_max_retries(max_retries);
            match self.deps.jobs.schedule_job(&job, SEND_RETRY_DELAYS[0]).await {
                Ok(result) => {
                    info!(message_id = %message.id, index, handle = %result.handle(), "reply queued for retry")
                }
                Err(e) => error!(message_id = %message.id, index, error = %e, "failed to queue reply retry"),
            }
        }

        for request in outcome.print_requests {
            let job = PrintTicketJob::new(request.order_id, request.printer_name, request.print_duplicate);
            if let Err(e) = self.deps.jobs.enqueue_job(&job).await {
                error!(order_id = job.order_id, error = %e, "failed to queue print job");
            }
        }
    }
}

#[async_trait]
impl JobHandler<ProcessIncomingMessageJob> for ProcessIncomingMessageHandler {
    async fn execute(&self, job: ProcessIncomingMessageJob, _cancel: CancellationToken) -> Result<()> {
        let message = job.message;
        let messaging = &self.deps.messaging;

        if !messaging.mark_read(&message.id).await {
            debug!(message_id = %message.id, "read receipt not sent");
        }

        let media = match message.content.media_id() {
            Some(media_id) => {
                let path = messaging.download_media(media_id).await;
                if path.is_none() {
                    warn!(message_id = %message.id, media_id, "media download failed");
                }
                path
            }
            None => None,
        };

        match self.deps.conversation.handle(&message, media.as_deref()).await {
            Ok(outcome) => self.deliver(&message, outcome).await,
            Err(e) => {
                error!(message_id = %message.id, from = %message.from, error = %e, "conversation failed");
                if !messaging.send_text(&message.from, APOLOGY_TEXT).await {
                    warn!(message_id = %message.id, "apology not delivered");
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// SendMessage
// =============================================================================

pub struct SendMessageHandler {
    deps: Arc<ServerDeps>,
}

impl SendMessageHandler {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler<SendMessageJob> for SendMessageHandler {
    async fn execute(&self, job: SendMessageJob, _cancel: CancellationToken) -> Result<()> {
        if send_outbound(&self.deps.messaging, &job.phone, &job.message).await {
            debug!(key = %job.key, kind = job.message.kind(), "message delivered");
            return Ok(());
        }
        bail!("{} message to {} not delivered", job.message.kind(), job.phone)
    }
}

// =============================================================================
// RefreshBreakerSettings
// =============================================================================

pub struct RefreshBreakerSettingsHandler {
    deps: Arc<ServerDeps>,
}

impl RefreshBreakerSettingsHandler {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler<RefreshBreakerSettingsJob> for RefreshBreakerSettingsHandler {
    async fn execute(&self, _job: RefreshBreakerSettingsJob, _cancel: CancellationToken) -> Result<()> {
        let breaker = self.deps.messaging.breaker();
        let current = breaker.config();
        let next = self.deps.settings.circuit_breaker(&current).await;

        if next != current {
            info!(
                breaker = %breaker.name(),
                failure_ratio = next.failure_ratio,
                minimum_throughput = next.minimum_throughput,
                break_duration_secs = next.break_duration.as_secs_f64(),
                "circuit breaker settings changed"
            );
            breaker.reconfigure(next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::messaging::conversation::PrintRequest;
    use crate::domains::messaging::models::InboundContent;
    use crate::kernel::settings::keys;
    use crate::kernel::test_dependencies::{MessagingCall, MockConversation, TestDependencies};
    use crate::kernel::jobs::Job;
    use std::time::Duration;

    fn inbound(content: InboundContent) -> ProcessIncomingMessageJob {
        ProcessIncomingMessageJob {
            message: InboundMessage {
                id: "wamid.1".into(),
                from: "5215550001".into(),
                contact_name: Some("Ana".into()),
                timestamp: None,
                content,
            },
        }
    }

    #[tokio::test]
    async fn replies_are_sent_and_prints_queued() {
        let outcome = ConversationOutcome {
            replies: vec![OutboundMessage::text("uno"), OutboundMessage::text("dos")],
            print_requests: vec![PrintRequest {
                order_id: 42,
                printer_name: "cocina".into(),
                print_duplicate: true,
            }],
        };
        let test_deps = TestDependencies::new().mock_conversation(MockConversation::new().with_outcome(outcome));
        let handler = ProcessIncomingMessageHandler::new(test_deps.into_server_deps());

        handler
            .execute(inbound(InboundContent::Text { body: "hola".into() }), CancellationToken::new())
            .await
            .unwrap();

        let calls = test_deps.messaging.calls();
        assert_eq!(calls[0], MessagingCall::MarkRead { message_id: "wamid.1".into() });
        assert_eq!(
            test_deps.messaging.sent_texts(),
            vec![
                ("5215550001".to_string(), "uno".to_string()),
                ("5215550001".to_string(), "dos".to_string()),
            ]
        );
        let prints = test_deps.job_queue.jobs_of_type(PrintTicketJob::JOB_TYPE);
        assert_eq!(prints.len(), 1);
        let print: PrintTicketJob = prints[0].payload().unwrap();
        assert_eq!(print.order_id, 42);
        assert_eq!(print.retry_count, 0);
        assert!(print.print_duplicate);
    }

    #[tokio::test]
    async fn media_is_downloaded_before_the_dialogue_runs() {
        let test_deps = TestDependencies::new()
            .mock_conversation(MockConversation::new().with_outcome(ConversationOutcome::default()));
        let handler = ProcessIncomingMessageHandler::new(test_deps.into_server_deps());

        let job = inbound(InboundContent::Media {
            media_type: "image".into(),
            media_id: "media-7".into(),
            mime_type: Some("image/jpeg".into()),
            caption: None,
        });
        handler.execute(job, CancellationToken::new()).await.unwrap();

        let seen = test_deps.conversation.seen();
        assert_eq!(seen[0].1.as_deref(), Some(std::path::Path::new("/tmp/media/media-7")));
    }

    #[tokio::test]
    async fn dialogue_failure_sends_apology_and_does_not_fail_the_job() {
        let test_deps = TestDependencies::new();
        let handler = ProcessIncomingMessageHandler::new(test_deps.into_server_deps());

        handler
            .execute(inbound(InboundContent::Text { body: "hola".into() }), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            test_deps.messaging.sent_texts(),
            vec![("5215550001".to_string(), APOLOGY_TEXT.to_string())]
        );
        assert!(test_deps.job_queue.live_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reply_becomes_a_retryable_send_job() {
        let test_deps = TestDependencies::new()
            .mock_settings(
                crate::kernel::settings::InMemorySettingsStore::new().with(keys::MESSAGE_RETRY_COUNT, 5),
            )
            .mock_conversation(
                MockConversation::new().with_outcome(ConversationOutcome::reply(OutboundMessage::text("hola"))),
            );
        test_deps.messaging.set_failing(true);
        let handler = ProcessIncomingMessageHandler::new(test_deps.into_server_deps());

        handler
            .execute(inbound(InboundContent::Text { body: "hola".into() }), CancellationToken::new())
            .await
            .unwrap();

        let sends = test_deps.job_queue.jobs_of_type(SendMessageJob::JOB_TYPE);
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].job_id, "send:reply:wamid.1:0");
        assert_eq!(sends[0].retry_policy.max_retries, 5);
        assert!(!sends[0].is_ready(tokio::time::Instant::now()));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(sends[0].is_ready(tokio::time::Instant::now()));
    }

    #[tokio::test]
    async fn send_handler_errors_when_delivery_fails() {
        let test_deps = TestDependencies::new();
        let handler = SendMessageHandler::new(test_deps.into_server_deps());
        let job = SendMessageJob::new("k", "5215550001", OutboundMessage::text("hola"));

        handler.execute(job.clone(), CancellationToken::new()).await.unwrap();

        test_deps.messaging.set_failing(true);
        assert!(handler.execute(job, CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn refresh_applies_changed_breaker_settings() {
        let test_deps = TestDependencies::new();
        let deps = test_deps.into_server_deps();
        let handler = RefreshBreakerSettingsHandler::new(deps.clone());

        handler
            .execute(RefreshBreakerSettingsJob::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(deps.messaging.breaker().config().minimum_throughput, 10);

        test_deps.settings.set(keys::CB_MINIMUM_THROUGHPUT, 25);
        handler
            .execute(RefreshBreakerSettingsJob::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(deps.messaging.breaker().config().minimum_throughput, 25);
    }
}

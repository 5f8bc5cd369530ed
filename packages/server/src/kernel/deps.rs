//! Server dependencies for job handlers and routes (using traits for testability)
//!
//! This module provides the central dependency container used by all domain handlers.
//! All external services use trait abstractions to enable testing.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use whatsapp::WhatsAppService;

use crate::domains::messaging::conversation::ConversationEngine;
use crate::kernel::jobs::JobQueue;
use crate::kernel::{
    BaseMessagingService, BaseOrderStore, BasePrinter, BaseStaffDirectory,
    ListRow, MetricsCollector, ReplyButton, ResilientMessagingService, RuntimeSettings,
};

// =============================================================================
// WhatsAppService Adapter (implements BaseMessagingService trait)
// =============================================================================

/// Wrapper around WhatsAppService that implements BaseMessagingService trait.
///
/// Errors stay `WhatsAppError` inside the `anyhow::Error` so the resilience
/// layer can classify them.
pub struct WhatsAppAdapter(pub Arc<WhatsAppService>);

impl WhatsAppAdapter {
    pub fn new(service: Arc<WhatsAppService>) -> Self {
        Self(service)
    }
}

#[async_trait]
impl BaseMessagingService for WhatsAppAdapter {
    async fn send_text(&self, phone: &str, body: &str) -> Result<()> {
        self.0.send_text(phone, body).await?;
        Ok(())
    }

    async fn send_buttons(
        &self,
        phone: &str,
        body: &str,
        buttons: &[ReplyButton],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> Result<()> {
        self.0
            .send_buttons(phone, body, buttons, header, footer)
            .await?;
        Ok(())
    }

    async fn send_list(
        &self,
        phone: &str,
        body: &str,
        button_label: &str,
        rows: &[ListRow],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> Result<()> {
        self.0
            .send_list(phone, body, button_label, rows, header, footer)
            .await?;
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        self.0.mark_read(message_id).await?;
        Ok(())
    }

    async fn download_media(&self, media_id: &str) -> Result<PathBuf> {
        Ok(self.0.download_media(media_id).await?)
    }

    async fn resend(&self, phone: &str, raw_payload: &Value) -> Result<()> {
        self.0.resend(phone, raw_payload).await?;
        Ok(())
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to handlers (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    /// Outbound messaging, always behind the circuit breaker
    pub messaging: Arc<ResilientMessagingService>,
    pub printer: Arc<dyn BasePrinter>,
    pub orders: Arc<dyn BaseOrderStore>,
    pub staff: Arc<dyn BaseStaffDirectory>,
    /// Hot-reloadable settings, read at point of use
    pub settings: RuntimeSettings,
    pub jobs: Arc<dyn JobQueue>,
    pub conversation: Arc<dyn ConversationEngine>,
    pub metrics: Arc<MetricsCollector>,
}

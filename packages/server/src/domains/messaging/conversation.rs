//! Seam to the conversational dialogue.
//!
//! The dialogue itself (menus, order taking, billing) lives behind
//! [`ConversationEngine`]. The broker only runs it inside a job and delivers
//! what it asks for.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::models::{InboundContent, InboundMessage, OutboundMessage};

/// A ticket the dialogue wants printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintRequest {
    pub order_id: i64,
    pub printer_name: String,
    pub print_duplicate: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationOutcome {
    pub replies: Vec<OutboundMessage>,
    pub print_requests: Vec<PrintRequest>,
}

impl ConversationOutcome {
    pub fn reply(message: OutboundMessage) -> Self {
        Self {
            replies: vec![message],
            print_requests: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Advance the dialogue for `message`. `media` is the downloaded file
    /// when the message carried one and the download succeeded.
    async fn handle(&self, message: &InboundMessage, media: Option<&Path>) -> Result<ConversationOutcome>;
}

/// Acknowledges every message and leaves the rest to an operator.
pub struct AcknowledgingConversation;

#[async_trait]
impl ConversationEngine for AcknowledgingConversation {
    async fn handle(&self, message: &InboundMessage, _media: Option<&Path>) -> Result<ConversationOutcome> {
        let greeting = match message.contact_name.as_deref() {
            Some(name) => format!("¡Gracias, {}!", name),
            None => "¡Gracias!".to_string(),
        };
        let body = match &message.content {
            InboundContent::Unsupported { .. } => format!(
                "{} Por ahora solo podemos leer texto, fotos y ubicaciones.",
                greeting
            ),
            _ => format!("{} Recibimos tu mensaje, en un momento te atendemos.", greeting),
        };
        Ok(ConversationOutcome::reply(OutboundMessage::text(body)))
    }
}

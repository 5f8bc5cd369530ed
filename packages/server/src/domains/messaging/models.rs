//! Inbound webhook events and outbound message shapes.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::{ListRow, ReplyButton};

// =============================================================================
// Inbound
// =============================================================================

/// One customer message taken from a webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider message id (`wamid...`), the dedup key.
    pub id: String,
    pub from: String,
    pub contact_name: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub content: InboundContent,
}

impl InboundMessage {
    pub fn dedup_key(&self) -> String {
        format!("inbound:{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundContent {
    Text {
        body: String,
    },
    ButtonReply {
        id: String,
        title: String,
    },
    ListReply {
        id: String,
        title: String,
        description: Option<String>,
    },
    Media {
        media_type: String,
        media_id: String,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
        address: Option<String>,
    },
    Unsupported {
        message_type: String,
    },
}

impl InboundContent {
    pub fn media_id(&self) -> Option<&str> {
        match self {
            InboundContent::Media { media_id, .. } => Some(media_id),
            _ => None,
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<ReplyButton>,
        header: Option<String>,
        footer: Option<String>,
    },
    List {
        body: String,
        button_label: String,
        rows: Vec<ListRow>,
        header: Option<String>,
        footer: Option<String>,
    },
    /// A previously captured API body sent again as-is.
    Raw {
        payload: Value,
    },
}

impl OutboundMessage {
    pub fn text(body: impl Into<String>) -> Self {
        OutboundMessage::Text { body: body.into() }
    }

    /// Body text, when the message has one.
    pub fn body(&self) -> Option<&str> {
        match self {
            OutboundMessage::Text { body }
            | OutboundMessage::Buttons { body, .. }
            | OutboundMessage::List { body, .. } => Some(body),
            OutboundMessage::Raw { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Text { .. } => "text",
            OutboundMessage::Buttons { .. } => "buttons",
            OutboundMessage::List { .. } => "list",
            OutboundMessage::Raw { .. } => "raw",
        }
    }
}

// =============================================================================
// Webhook payload (WhatsApp Cloud API)
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: Option<String>,
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub contacts: Vec<WebhookContact>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookContact {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<ContactProfile>,
}

#[derive(Debug, Deserialize)]
pub struct ContactProfile {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<RawText>,
    #[serde(default)]
    pub interactive: Option<RawInteractive>,
    #[serde(default)]
    pub button: Option<RawButton>,
    #[serde(default)]
    pub location: Option<RawLocation>,
    #[serde(default)]
    pub image: Option<RawMedia>,
    #[serde(default)]
    pub audio: Option<RawMedia>,
    #[serde(default)]
    pub video: Option<RawMedia>,
    #[serde(default)]
    pub document: Option<RawMedia>,
    #[serde(default)]
    pub sticker: Option<RawMedia>,
}

#[derive(Debug, Deserialize)]
pub struct RawText {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct RawInteractive {
    #[serde(default)]
    pub button_reply: Option<RawReply>,
    #[serde(default)]
    pub list_reply: Option<RawReply>,
}

#[derive(Debug, Deserialize)]
pub struct RawReply {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawButton {
    pub payload: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct RawLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMedia {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl WebhookPayload {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Flatten every message in the delivery. Status updates carry no
    /// messages and yield nothing.
    pub fn into_messages(self) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        for change in self.entry.into_iter().flat_map(|e| e.changes) {
            if change.field.as_deref().is_some_and(|f| f != "messages") {
                continue;
            }
            let ChangeValue { contacts, messages } = change.value;
            for raw in messages {
                let contact_name = contacts
                    .iter()
                    .find(|c| c.wa_id == raw.from)
                    .or(contacts.first())
                    .and_then(|c| c.profile.as_ref())
                    .and_then(|p| p.name.clone());
                out.push(raw.into_inbound(contact_name));
            }
        }
        out
    }
}

impl RawMessage {
    fn into_inbound(self, contact_name: Option<String>) -> InboundMessage {
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        let content = self.content();
        InboundMessage {
            id: self.id,
            from: self.from,
            contact_name,
            timestamp,
            content,
        }
    }

    fn content(&self) -> InboundContent {
        let unsupported = || InboundContent::Unsupported {
            message_type: self.message_type.clone(),
        };

        match self.message_type.as_str() {
            "text" => match &self.text {
                Some(text) => InboundContent::Text {
                    body: text.body.clone(),
                },
                None => unsupported(),
            },
            "interactive" => {
                let interactive = self.interactive.as_ref();
                if let Some(reply) = interactive.and_then(|i| i.button_reply.as_ref()) {
                    InboundContent::ButtonReply {
                        id: reply.id.clone(),
                        title: reply.title.clone(),
                    }
                } else if let Some(reply) = interactive.and_then(|i| i.list_reply.as_ref()) {
                    InboundContent::ListReply {
                        id: reply.id.clone(),
                        title: reply.title.clone(),
                        description: reply.description.clone(),
                    }
                } else {
                    unsupported()
                }
            }
            "button" => match &self.button {
                Some(button) => InboundContent::ButtonReply {
                    id: button.payload.clone().unwrap_or_else(|| button.text.clone()),
                    title: button.text.clone(),
                },
                None => unsupported(),
            },
            "location" => match &self.location {
                Some(loc) => InboundContent::Location {
                    latitude: loc.latitude,
                    longitude: loc.longitude,
                    name: loc.name.clone(),
                    address: loc.address.clone(),
                },
                None => unsupported(),
            },
            kind @ ("image" | "audio" | "video" | "document" | "sticker") => {
                let media = match kind {
                    "image" => &self.image,
                    "audio" => &self.audio,
                    "video" => &self.video,
                    "document" => &self.document,
                    _ => &self.sticker,
                };
                match media {
                    Some(media) => InboundContent::Media {
                        media_type: kind.to_string(),
                        media_id: media.id.clone(),
                        mime_type: media.mime_type.clone(),
                        caption: media.caption.clone(),
                    },
                    None => unsupported(),
                }
            }
            _ => unsupported(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delivery(messages: Value) -> Vec<u8> {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "contacts": [{ "profile": { "name": "Marta" }, "wa_id": "5215550003" }],
                        "messages": messages
                    }
                }]
            }]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn parses_text_message_with_contact() {
        let body = delivery(json!([{
            "from": "5215550003",
            "id": "wamid.A",
            "timestamp": "1767225600",
            "type": "text",
            "text": { "body": "quiero dos tacos" }
        }]));

        let messages = WebhookPayload::from_slice(&body).unwrap().into_messages();
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.id, "wamid.A");
        assert_eq!(msg.dedup_key(), "inbound:wamid.A");
        assert_eq!(msg.contact_name.as_deref(), Some("Marta"));
        assert_eq!(msg.timestamp.unwrap().timestamp(), 1_767_225_600);
        assert_eq!(
            msg.content,
            InboundContent::Text {
                body: "quiero dos tacos".into()
            }
        );
    }

    #[test]
    fn parses_interactive_media_and_unknown_types() {
        let body = delivery(json!([
            {
                "from": "5215550003", "id": "wamid.B", "type": "interactive",
                "interactive": { "type": "list_reply", "list_reply": { "id": "menu-2", "title": "Combo" } }
            },
            {
                "from": "5215550003", "id": "wamid.C", "type": "image",
                "image": { "id": "media-9", "mime_type": "image/jpeg" }
            },
            { "from": "5215550003", "id": "wamid.D", "type": "reaction" }
        ]));

        let messages = WebhookPayload::from_slice(&body).unwrap().into_messages();
        assert!(matches!(&messages[0].content, InboundContent::ListReply { id, .. } if id == "menu-2"));
        assert_eq!(messages[1].content.media_id(), Some("media-9"));
        assert_eq!(
            messages[2].content,
            InboundContent::Unsupported {
                message_type: "reaction".into()
            }
        );
    }

    #[test]
    fn status_updates_yield_no_messages() {
        let body = json!({
            "entry": [{ "changes": [{ "field": "messages", "value": { "statuses": [{ "id": "wamid.X" }] } }] }]
        })
        .to_string();

        let messages = WebhookPayload::from_slice(body.as_bytes())
            .unwrap()
            .into_messages();
        assert!(messages.is_empty());
    }

    #[test]
    fn outbound_messages_survive_job_payload_encoding() {
        let message = OutboundMessage::Buttons {
            body: "¿Confirmas tu pedido?".into(),
            buttons: vec![ReplyButton {
                id: "yes".into(),
                title: "Sí".into(),
            }],
            header: None,
            footer: Some("Orderdesk".into()),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "buttons");
        assert_eq!(serde_json::from_value::<OutboundMessage>(value).unwrap(), message);
    }
}

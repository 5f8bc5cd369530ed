pub mod conversation;
pub mod dispatch;
pub mod handlers;
pub mod jobs;
pub mod models;

pub use conversation::{
    AcknowledgingConversation, ConversationEngine, ConversationOutcome, PrintRequest,
};
pub use dispatch::{AcceptOutcome, WebhookDispatcher, DEFAULT_DEDUP_TTL};
pub use handlers::{
    register_messaging_jobs, send_outbound, ProcessIncomingMessageHandler, RefreshBreakerSettingsHandler,
    SendMessageHandler, APOLOGY_TEXT,
};
pub use jobs::{ProcessIncomingMessageJob, RefreshBreakerSettingsJob, SendMessageJob};
pub use models::{InboundContent, InboundMessage, OutboundMessage, WebhookPayload};

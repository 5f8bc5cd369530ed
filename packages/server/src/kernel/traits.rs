// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (retry policy, escalation wording) lives in domain modules that use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseMessagingService, BasePrinter)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::domains::orders::models::{Customer, Order, StaffMember, StaffRole};
use crate::domains::printing::ticket::Ticket;
use crate::kernel::printer::PrintError;

pub use whatsapp::{ListRow, ReplyButton};

// =============================================================================
// Messaging Trait (Infrastructure - WhatsApp Cloud API)
// =============================================================================

/// Raw outbound messaging capability.
///
/// Implementations return errors for transport and API failures; callers go
/// through [`crate::kernel::ResilientMessagingService`], which turns every
/// failure into `false`/`None`.
#[async_trait]
pub trait BaseMessagingService: Send + Sync {
    async fn send_text(&self, phone: &str, body: &str) -> Result<()>;

    async fn send_buttons(
        &self,
        phone: &str,
        body: &str,
        buttons: &[ReplyButton],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> Result<()>;

    async fn send_list(
        &self,
        phone: &str,
        body: &str,
        button_label: &str,
        rows: &[ListRow],
        header: Option<&str>,
        footer: Option<&str>,
    ) -> Result<()>;

    async fn mark_read(&self, message_id: &str) -> Result<()>;

    /// Download a media object and return where it was stored.
    async fn download_media(&self, media_id: &str) -> Result<PathBuf>;

    async fn resend(&self, phone: &str, raw_payload: &Value) -> Result<()>;
}

// =============================================================================
// Printer Trait (Infrastructure - network receipt printer)
// =============================================================================

#[async_trait]
pub trait BasePrinter: Send + Sync {
    /// Print a ticket on the named printer.
    ///
    /// Connection and write failures (including timeouts) are returned as
    /// [`PrintError`]; implementations never panic on I/O errors.
    async fn print_ticket(&self, printer_name: &str, ticket: &Ticket) -> Result<(), PrintError>;
}

// =============================================================================
// Order Store Trait (Infrastructure - persistence, owned elsewhere)
// =============================================================================

#[async_trait]
pub trait BaseOrderStore: Send + Sync {
    async fn find_order(&self, order_id: i64) -> Result<Option<Order>>;

    async fn find_customer(&self, customer_id: i64) -> Result<Option<Customer>>;
}

// =============================================================================
// Staff Directory Trait (Infrastructure - operator accounts)
// =============================================================================

#[async_trait]
pub trait BaseStaffDirectory: Send + Sync {
    /// Active staff members holding any of the given roles.
    async fn active_with_roles(&self, roles: &[StaffRole]) -> Result<Vec<StaffMember>>;
}

// =============================================================================
// Settings Store Trait (Infrastructure - hot-reloadable key/value config)
// =============================================================================

#[async_trait]
pub trait BaseSettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

// =============================================================================
// Dedup Store Trait (Infrastructure - short-TTL key existence)
// =============================================================================

#[async_trait]
pub trait BaseDedupStore: Send + Sync {
    /// Set `key` if it is absent (or expired). Returns `true` when this call set it.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;
}

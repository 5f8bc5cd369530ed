// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into ServerDeps for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::dedup::InMemoryDedupStore;
use super::deps::ServerDeps;
use super::jobs::InMemoryJobQueue;
use super::metrics::MetricsCollector;
use super::printer::PrintError;
use super::resilient_messaging::ResilientMessagingService;
use super::settings::{InMemorySettingsStore, RuntimeSettings};
use super::{BaseMessagingService, BaseOrderStore, BasePrinter, BaseStaffDirectory, ListRow, ReplyButton};
use crate::domains::messaging::conversation::{ConversationEngine, ConversationOutcome};
use crate::domains::messaging::models::InboundMessage;
use crate::domains::orders::models::{Customer, Order, StaffMember, StaffRole};
use crate::domains::printing::ticket::Ticket;

// =============================================================================
// Mock Messaging Service
// =============================================================================

/// A call captured by [`MockMessagingService`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessagingCall {
    Text { phone: String, body: String },
    Buttons { phone: String, body: String, buttons: Vec<ReplyButton> },
    List { phone: String, body: String, rows: Vec<ListRow> },
    MarkRead { message_id: String },
    DownloadMedia { media_id: String },
    Resend { phone: String, payload: Value },
}

pub struct MockMessagingService {
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: Arc<Mutex<Vec<MessagingCall>>>,
}

impl Default for MockMessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessagingService {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every call return an error (calls are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep before answering each call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    pub fn calls(&self) -> Vec<MessagingCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// `(phone, body)` of every text message attempted.
    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MessagingCall::Text { phone, body } => Some((phone, body)),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, call: MessagingCall) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);

        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("mock messaging failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl BaseMessagingService for MockMessagingService {
    async fn send_text(&self, phone: &str, body: &str) -> Result<()> {
        self.record(MessagingCall::Text {
            phone: phone.to_string(),
            body: body.to_string(),
        })
        .await
    }

    async fn send_buttons(
        &self,
        phone: &str,
        body: &str,
        buttons: &[ReplyButton],
        _header: Option<&str>,
        _footer: Option<&str>,
    ) -> Result<()> {
        self.record(MessagingCall::Buttons {
            phone: phone.to_string(),
            body: body.to_string(),
            buttons: buttons.to_vec(),
        })
        .await
    }

    async fn send_list(
        &self,
        phone: &str,
        body: &str,
        _button_label: &str,
        rows: &[ListRow],
        _header: Option<&str>,
        _footer: Option<&str>,
    ) -> Result<()> {
        self.record(MessagingCall::List {
            phone: phone.to_string(),
            body: body.to_string(),
            rows: rows.to_vec(),
        })
        .await
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        self.record(MessagingCall::MarkRead {
            message_id: message_id.to_string(),
        })
        .await
    }

    async fn download_media(&self, media_id: &str) -> Result<PathBuf> {
        self.record(MessagingCall::DownloadMedia {
            media_id: media_id.to_string(),
        })
        .await?;
        Ok(PathBuf::from(format!("/tmp/media/{}", media_id)))
    }

    async fn resend(&self, phone: &str, raw_payload: &Value) -> Result<()> {
        self.record(MessagingCall::Resend {
            phone: phone.to_string(),
            payload: raw_payload.clone(),
        })
        .await
    }
}

// =============================================================================
// Mock Printer
// =============================================================================

pub struct MockPrinter {
    failing: AtomicBool,
    /// Fail only tickets marked as duplicates.
    failing_duplicates: AtomicBool,
    attempts: AtomicUsize,
    printed: Arc<Mutex<Vec<(String, Ticket)>>>,
}

impl Default for MockPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPrinter {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            failing_duplicates: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            printed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_duplicates(&self, failing: bool) {
        self.failing_duplicates.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successfully printed `(printer, ticket)` pairs.
    pub fn printed(&self) -> Vec<(String, Ticket)> {
        self.printed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl BasePrinter for MockPrinter {
    async fn print_ticket(&self, printer_name: &str, ticket: &Ticket) -> Result<(), PrintError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let fail = self.failing.load(Ordering::SeqCst)
            || (ticket.is_duplicate && self.failing_duplicates.load(Ordering::SeqCst));
        if fail {
            return Err(PrintError::ConnectTimeout {
                printer: printer_name.to_string(),
            });
        }

        self.printed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((printer_name.to_string(), ticket.clone()));
        Ok(())
    }
}

// =============================================================================
// In-memory Order Store
// =============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<i64, Order>>,
    customers: Mutex<HashMap<i64, Customer>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(self, order: Order, customer: Customer) -> Self {
        self.insert(order, customer);
        self
    }

    pub fn insert(&self, order: Order, customer: Customer) {
        self.customers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(customer.id, customer);
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(order.id, order);
    }
}

#[async_trait]
impl BaseOrderStore for InMemoryOrderStore {
    async fn find_order(&self, order_id: i64) -> Result<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&order_id)
            .cloned())
    }

    async fn find_customer(&self, customer_id: i64) -> Result<Option<Customer>> {
        Ok(self
            .customers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&customer_id)
            .cloned())
    }
}

// =============================================================================
// In-memory Staff Directory
// =============================================================================

#[derive(Default)]
pub struct InMemoryStaffDirectory {
    members: Mutex<Vec<StaffMember>>,
}

impl InMemoryStaffDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(self, name: &str, phone: Option<&str>, role: StaffRole, active: bool) -> Self {
        self.members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StaffMember {
                name: name.to_string(),
                phone: phone.map(str::to_string),
                role,
                active,
            });
        self
    }
}

#[async_trait]
impl BaseStaffDirectory for InMemoryStaffDirectory {
    async fn active_with_roles(&self, roles: &[StaffRole]) -> Result<Vec<StaffMember>> {
        Ok(self
            .members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.active && roles.contains(&m.role))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Mock Conversation
// =============================================================================

/// Returns a scripted outcome, or fails when no outcome is set.
#[derive(Default)]
pub struct MockConversation {
    outcome: Mutex<Option<ConversationOutcome>>,
    seen: Arc<Mutex<Vec<(InboundMessage, Option<PathBuf>)>>>,
}

impl MockConversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, outcome: ConversationOutcome) -> Self {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
        self
    }

    /// Messages handled so far, with the media path passed in.
    pub fn seen(&self) -> Vec<(InboundMessage, Option<PathBuf>)> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ConversationEngine for MockConversation {
    async fn handle(&self, message: &InboundMessage, media: Option<&Path>) -> Result<ConversationOutcome> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((message.clone(), media.map(Path::to_path_buf)));

        self.outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| anyhow!("dialogue state unavailable"))
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub messaging: Arc<MockMessagingService>,
    pub printer: Arc<MockPrinter>,
    pub orders: Arc<InMemoryOrderStore>,
    pub staff: Arc<InMemoryStaffDirectory>,
    pub settings: Arc<InMemorySettingsStore>,
    pub dedup: Arc<InMemoryDedupStore>,
    pub job_queue: Arc<InMemoryJobQueue>,
    pub conversation: Arc<MockConversation>,
    pub metrics: Arc<MetricsCollector>,
    pub breaker_config: CircuitBreakerConfig,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            messaging: Arc::new(MockMessagingService::new()),
            printer: Arc::new(MockPrinter::new()),
            orders: Arc::new(InMemoryOrderStore::new()),
            staff: Arc::new(InMemoryStaffDirectory::new()),
            settings: Arc::new(InMemorySettingsStore::new()),
            dedup: Arc::new(InMemoryDedupStore::new()),
            job_queue: Arc::new(InMemoryJobQueue::new()),
            conversation: Arc::new(MockConversation::new()),
            metrics: Arc::new(MetricsCollector::new()),
            breaker_config: CircuitBreakerConfig {
                max_retries: 0,
                ..Default::default()
            },
        }
    }

    /// Set the order store contents
    pub fn mock_orders(mut self, orders: InMemoryOrderStore) -> Self {
        self.orders = Arc::new(orders);
        self
    }

    /// Set the staff directory contents
    pub fn mock_staff(mut self, staff: InMemoryStaffDirectory) -> Self {
        self.staff = Arc::new(staff);
        self
    }

    /// Set a scripted conversation
    pub fn mock_conversation(mut self, conversation: MockConversation) -> Self {
        self.conversation = Arc::new(conversation);
        self
    }

    /// Set initial settings
    pub fn mock_settings(mut self, settings: InMemorySettingsStore) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Build ServerDeps over the mocks. The messaging mock is wrapped in a
    /// real breaker so tests exercise the same path as production.
    pub fn into_server_deps(&self) -> Arc<ServerDeps> {
        let breaker = Arc::new(CircuitBreaker::new("whatsapp", self.breaker_config.clone()));
        let messaging = Arc::new(ResilientMessagingService::new(
            self.messaging.clone(),
            breaker,
            self.metrics.clone(),
        ));

        Arc::new(ServerDeps {
            messaging,
            printer: self.printer.clone(),
            orders: self.orders.clone(),
            staff: self.staff.clone(),
            settings: RuntimeSettings::new(self.settings.clone()),
            jobs: self.job_queue.clone(),
            conversation: self.conversation.clone(),
            metrics: self.metrics.clone(),
        })
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

//! Kernel module - server infrastructure and dependencies.

pub mod circuit_breaker;
pub mod dedup;
pub mod deps;
pub mod jobs;
pub mod metrics;
pub mod printer;
pub mod resilient_messaging;
pub mod settings;
pub mod test_dependencies;
pub mod traits;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use dedup::InMemoryDedupStore;
pub use deps::{ServerDeps, WhatsAppAdapter};
pub use metrics::{ErrorCount, LatencyStats, MetricsCollector, MetricsSnapshot, OperationStats};
pub use printer::{PrintError, TcpTicketPrinter, DEFAULT_PRINTER_TIMEOUT};
pub use resilient_messaging::ResilientMessagingService;
pub use settings::{InMemorySettingsStore, LayeredSettingsStore, PgSettingsStore, RuntimeSettings};
pub use test_dependencies::TestDependencies;
pub use traits::*;

//! Hot-reloadable runtime settings.
//!
//! Values live in a key/value store owned outside this service (the
//! `configurations` table in production). They are read at the point of use,
//! so an operator edit applies to the next job or request without a restart.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use super::circuit_breaker::CircuitBreakerConfig;
use super::traits::BaseSettingsStore;

pub mod keys {
    pub const PRINT_RETRY_COUNT: &str = "print.retry_count";
    pub const PRINT_RETRY_INTERVAL_SECONDS: &str = "print.retry_interval_seconds";
    pub const MESSAGE_RETRY_COUNT: &str = "message.retry_count";
    pub const CB_FAILURE_RATIO: &str = "circuit_breaker.failure_ratio";
    pub const CB_BREAK_DURATION_SECONDS: &str = "circuit_breaker.break_duration_seconds";
    pub const CB_TIMEOUT_SECONDS: &str = "circuit_breaker.timeout_seconds";
    pub const CB_SAMPLING_DURATION_SECONDS: &str = "circuit_breaker.sampling_duration_seconds";
    pub const CB_MINIMUM_THROUGHPUT: &str = "circuit_breaker.minimum_throughput";
    pub const WEBHOOK_VERIFY_TOKEN: &str = "webhook.verify_token";
    pub const WEBHOOK_APP_SECRET: &str = "webhook.app_secret";
}

pub const DEFAULT_PRINT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_PRINT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MESSAGE_RETRY_COUNT: u32 = 3;

/// Typed, defaulted view over a [`BaseSettingsStore`].
#[derive(Clone)]
pub struct RuntimeSettings {
    store: Arc<dyn BaseSettingsStore>,
}

impl RuntimeSettings {
    pub fn new(store: Arc<dyn BaseSettingsStore>) -> Self {
        Self { store }
    }

    /// Raw lookup. Store errors are logged and treated as unset.
    pub async fn get_string(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(e) => {
                warn!(key, error = %e, "failed to read setting, using default");
                None
            }
        }
    }

    async fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get_string(key).await {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, value = %raw, "invalid setting value, using default");
                default
            }),
            None => default,
        }
    }

    pub async fn print_retry_count(&self) -> u32 {
        self.get_parsed(keys::PRINT_RETRY_COUNT, DEFAULT_PRINT_RETRY_COUNT)
            .await
    }

    pub async fn print_retry_interval(&self) -> Duration {
        let secs = self
            .get_parsed(
                keys::PRINT_RETRY_INTERVAL_SECONDS,
                DEFAULT_PRINT_RETRY_INTERVAL.as_secs(),
            )
            .await;
        Duration::from_secs(secs)
    }

    pub async fn message_retry_count(&self) -> u32 {
        self.get_parsed(keys::MESSAGE_RETRY_COUNT, DEFAULT_MESSAGE_RETRY_COUNT)
            .await
    }

    /// Breaker tuning, starting from `base` for anything not configured.
    pub async fn circuit_breaker(&self, base: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        let failure_ratio: f64 = self
            .get_parsed(keys::CB_FAILURE_RATIO, base.failure_ratio)
            .await;
        let break_secs = self
            .get_parsed(
                keys::CB_BREAK_DURATION_SECONDS,
                base.break_duration.as_secs_f64(),
            )
            .await;
        let timeout_secs = self
            .get_parsed(keys::CB_TIMEOUT_SECONDS, base.call_timeout.as_secs_f64())
            .await;
        let sampling_secs = self
            .get_parsed(
                keys::CB_SAMPLING_DURATION_SECONDS,
                base.sampling_duration.as_secs_f64(),
            )
            .await;
        let minimum_throughput = self
            .get_parsed(keys::CB_MINIMUM_THROUGHPUT, base.minimum_throughput)
            .await;

        CircuitBreakerConfig {
            failure_ratio: failure_ratio.clamp(0.0, 1.0),
            break_duration: secs(break_secs, base.break_duration),
            call_timeout: secs(timeout_secs, base.call_timeout),
            sampling_duration: secs(sampling_secs, base.sampling_duration),
            minimum_throughput: minimum_throughput.max(1),
            ..base.clone()
        }
    }

    pub async fn webhook_verify_token(&self) -> Option<String> {
        self.get_string(keys::WEBHOOK_VERIFY_TOKEN).await
    }

    pub async fn webhook_app_secret(&self) -> Option<String> {
        self.get_string(keys::WEBHOOK_APP_SECRET).await
    }
}

fn secs(value: f64, fallback: Duration) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        fallback
    }
}

/// Settings held in process memory, writable at runtime.
#[derive(Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: impl ToString) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

#[async_trait]
impl BaseSettingsStore for InMemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }
}

/// Settings backed by the `configurations` table.
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseSettingsStore for PgSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            r#"
            SELECT value
            FROM configurations
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }
}

/// Settings read first from `primary`, then from `fallback`.
///
/// Lets the environment seed values (webhook secrets) that the database may
/// override later.
pub struct LayeredSettingsStore {
    primary: Arc<dyn BaseSettingsStore>,
    fallback: Arc<dyn BaseSettingsStore>,
}

impl LayeredSettingsStore {
    pub fn new(primary: Arc<dyn BaseSettingsStore>, fallback: Arc<dyn BaseSettingsStore>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl BaseSettingsStore for LayeredSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.primary.get(key).await {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => self.fallback.get(key).await,
            Err(e) => {
                warn!(key, error = %e, "primary settings store failed, using fallback");
                self.fallback.get(key).await
            }
        }
    }
}

//! Application setup and server configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    routing::get,
    Router,
};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use whatsapp::{WhatsAppOptions, WhatsAppService};

use crate::config::Config;
use crate::domains::messaging::{
    register_messaging_jobs, AcknowledgingConversation, RefreshBreakerSettingsJob,
    WebhookDispatcher,
};
use crate::domains::orders::{PgOrderStore, PgStaffDirectory};
use crate::domains::printing::register_printing_jobs;
use crate::kernel::jobs::{
    InMemoryJobQueue, Job, JobRegistry, JobRunner, JobRunnerConfig, RecurringJobs,
};
use crate::kernel::settings::keys;
use crate::kernel::{
    BaseSettingsStore, CircuitBreaker, CircuitBreakerConfig, InMemoryDedupStore,
    InMemorySettingsStore, LayeredSettingsStore, MetricsCollector, PgSettingsStore,
    ResilientMessagingService, RuntimeSettings, ServerDeps, TcpTicketPrinter, WhatsAppAdapter,
};
use crate::server::routes::{
    health_handler, metrics_handler, receive_webhook_handler, verify_webhook_handler,
};

/// Breaker settings are re-read on this schedule.
pub const BREAKER_REFRESH_CRON: &str = "*/1 * * * *";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ServerDeps>,
    pub dispatcher: WebhookDispatcher,
    /// Concrete queue, for stats.
    pub job_queue: Arc<InMemoryJobQueue>,
    pub db_pool: Option<PgPool>,
}

/// Background services started alongside the router.
pub struct BackgroundServices {
    pub runner: JoinHandle<()>,
    pub recurring: RecurringJobs,
}

/// Build the router over already-constructed state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/webhook",
            get(verify_webhook_handler).post(receive_webhook_handler),
        )
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Register every job handler.
pub fn build_job_registry(deps: Arc<ServerDeps>) -> Result<JobRegistry> {
    let mut registry = JobRegistry::new();
    register_messaging_jobs(&mut registry, deps.clone())?;
    register_printing_jobs(&mut registry, deps)?;
    Ok(registry)
}

/// Wire production dependencies, start the job runner and recurring jobs,
/// and return the router.
///
/// Cancelling `shutdown` stops the runner; the caller awaits
/// [`BackgroundServices::runner`] to let in-flight jobs drain.
pub async fn build_app(
    pool: PgPool,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<(Router, BackgroundServices)> {
    // Settings table first, environment as fallback for the webhook secrets.
    let mut env_settings = InMemorySettingsStore::new();
    if let Some(token) = &config.webhook_verify_token {
        env_settings = env_settings.with(keys::WEBHOOK_VERIFY_TOKEN, token);
    }
    if let Some(secret) = &config.webhook_app_secret {
        env_settings = env_settings.with(keys::WEBHOOK_APP_SECRET, secret);
    }
    let settings_store: Arc<dyn BaseSettingsStore> = Arc::new(LayeredSettingsStore::new(
        Arc::new(PgSettingsStore::new(pool.clone())),
        Arc::new(env_settings),
    ));
    let settings = RuntimeSettings::new(settings_store);

    let printer = TcpTicketPrinter::new(config.printers.clone(), config.printer_timeout);
    tracing::info!(
        printers = ?printer.printer_names().collect::<Vec<_>>(),
        "ticket printers configured"
    );

    // WhatsApp behind the circuit breaker
    let mut options = WhatsAppOptions::new(
        config.whatsapp_access_token.clone(),
        config.whatsapp_phone_number_id.clone(),
    );
    options.media_dir = config.media_dir.clone();
    let whatsapp =
        Arc::new(WhatsAppService::new(options).context("Failed to create WhatsApp client")?);

    let metrics = Arc::new(MetricsCollector::new());
    let breaker_config = settings
        .circuit_breaker(&CircuitBreakerConfig::default())
        .await;
    let breaker = Arc::new(CircuitBreaker::new("whatsapp", breaker_config));
    let messaging = Arc::new(ResilientMessagingService::new(
        Arc::new(WhatsAppAdapter::new(whatsapp)),
        breaker,
        metrics.clone(),
    ));

    let job_queue = Arc::new(InMemoryJobQueue::new());
    let dedup = Arc::new(InMemoryDedupStore::new());

    let deps = Arc::new(ServerDeps {
        messaging,
        printer: Arc::new(printer),
        orders: Arc::new(PgOrderStore::new(pool.clone())),
        staff: Arc::new(PgStaffDirectory::new(pool.clone())),
        settings,
        jobs: job_queue.clone(),
        conversation: Arc::new(AcknowledgingConversation),
        metrics,
    });

    // Create job registry and spawn the job runner as a background task
    let registry = Arc::new(build_job_registry(deps.clone())?);
    tracing::info!(job_types = ?registry.registered_types(), "job handlers registered");

    let runner_config = JobRunnerConfig {
        concurrency: config.job_concurrency,
        ..Default::default()
    };
    let runner = JobRunner::with_config(job_queue.clone(), registry, runner_config);
    let runner = tokio::spawn(async move {
        if let Err(e) = runner.run(shutdown).await {
            tracing::error!(error = %e, "Job runner exited with error");
        }
    });

    let recurring = RecurringJobs::new(job_queue.clone()).await?;
    recurring
        .add_recurring(
            RefreshBreakerSettingsJob::JOB_TYPE,
            &RefreshBreakerSettingsJob::default(),
            BREAKER_REFRESH_CRON,
        )
        .await?;
    recurring.start().await?;

    let state = AppState {
        dispatcher: WebhookDispatcher::new(dedup, job_queue.clone()),
        deps,
        job_queue,
        db_pool: Some(pool),
    };

    Ok((build_router(state), BackgroundServices { runner, recurring }))
}

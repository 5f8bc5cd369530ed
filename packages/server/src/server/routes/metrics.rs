use axum::{extract::Extension, Json};
use serde::Serialize;

use crate::kernel::jobs::QueueStats;
use crate::kernel::{CircuitStatus, MetricsSnapshot};
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct MetricsResponse {
    pub messaging: MetricsSnapshot,
    pub circuit: CircuitStatus,
    pub jobs: QueueStats,
}

/// Outbound messaging metrics, breaker state and queue counts.
pub async fn metrics_handler(Extension(state): Extension<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        messaging: state.deps.metrics.snapshot(),
        circuit: state.deps.messaging.circuit_status(),
        jobs: state.job_queue.stats(),
    })
}

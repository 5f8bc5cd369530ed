use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::kernel::{CircuitState, CircuitStatus};
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<DatabaseHealth>,
    messaging: CircuitStatus,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    size: u32,
    idle_connections: usize,
}

/// Health check endpoint
///
/// Checks:
/// - Database connectivity (when a pool is attached)
/// - WhatsApp circuit breaker state
///
/// Returns 503 when the database is unreachable. An open circuit is reported
/// as `degraded` with 200, since inbound webhooks are still accepted.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.db_pool {
        Some(pool) => {
            let (status, error) = match tokio::time::timeout(
                std::time::Duration::from_secs(5),
                sqlx::query("SELECT 1").execute(pool),
            )
            .await
            {
                Ok(Ok(_)) => ("ok".to_string(), None),
                Ok(Err(e)) => ("error".to_string(), Some(format!("Query failed: {}", e))),
                Err(_) => ("error".to_string(), Some("Query timeout (>5s)".to_string())),
            };
            Some(DatabaseHealth {
                status,
                error,
                size: pool.size(),
                idle_connections: pool.num_idle(),
            })
        }
        None => None,
    };

    let messaging = state.deps.messaging.circuit_status();
    let db_ok = database.as_ref().map_or(true, |db| db.status == "ok");

    let (status_code, status) = if !db_ok {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else if messaging.state != CircuitState::Closed {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            database,
            messaging,
        }),
    )
}

//! Liveness and dependency health.

use axum::Json;
use axum::extract::State;
use tracing::warn;

use crate::AppState;
use crate::models::HealthResponse;

/// `GET /api/health`: always 200; `status` reports degradation.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (kv, database) = tokio::join!(state.kv.ping(), state.users.ping());
    if let Err(e) = &kv {
        warn!(error = %e, "health: key-value store unreachable");
    }
    if let Err(e) = &database {
        warn!(error = %e, "health: user store unreachable");
    }
    let (kv, database) = (kv.is_ok(), database.is_ok());
    Json(HealthResponse {
        status: if kv && database { "ok" } else { "degraded" },
        kv,
        database,
        kv_fail_open: state.kv_failures.count(),
        audit_dropped: state.audit.dropped(),
    })
}

//! Audit trail read access.

use axum::Json;
use axum::extract::State;
use storefront_core::audit::{AuditEvent, AuditQuery};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ApiQuery;

/// `GET /api/admin/audit-logs?user_id&action&resource&success&limit`,
/// newest first.
pub async fn list_audit_logs_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AuditQuery>,
) -> AppResult<Json<Vec<AuditEvent>>> {
    Ok(Json(state.audit_log.query(&query).await?))
}

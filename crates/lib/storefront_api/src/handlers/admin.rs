//! Legacy admin actions on users: ban, unban, revoke sessions.

use axum::extract::{Path, State};
use axum::{Extension, Json};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthContext;
use crate::middleware::meta::RequestMeta;
use crate::models::MessageResponse;
use crate::services::auth;

/// `POST /api/admin/users/{id}/ban`
pub async fn ban_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthContext>,
    meta: RequestMeta,
    Path(user_id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::ban_user(&state, &meta.audit_context(Some(&admin)), &user_id).await?;
    Ok(Json(resp))
}

/// `POST /api/admin/users/{id}/unban`
pub async fn unban_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthContext>,
    meta: RequestMeta,
    Path(user_id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::unban_user(&state, &meta.audit_context(Some(&admin)), &user_id).await?;
    Ok(Json(resp))
}

/// `DELETE /api/admin/users/{id}/sessions`
pub async fn revoke_sessions_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthContext>,
    meta: RequestMeta,
    Path(user_id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::revoke_sessions(&state, &meta.audit_context(Some(&admin)), &user_id).await?;
    Ok(Json(resp))
}

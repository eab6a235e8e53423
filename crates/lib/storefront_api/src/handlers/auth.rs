//! Authentication request handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::ApiJson;
use crate::middleware::auth::AuthContext;
use crate::middleware::meta::RequestMeta;
use crate::models::{
    ChangePasswordRequest, DeleteAccountRequest, ForgotPasswordRequest, LoginRequest,
    LogoutRequest, MessageResponse, RefreshRequest, RefreshResponse, RegisterRequest,
    ResetPasswordRequest, SessionsResponse, TokenResponse, UserSummary,
};
use crate::services::auth;

/// `POST /api/auth/register`: create a local account.
pub async fn register_handler(
    State(state): State<AppState>,
    meta: RequestMeta,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let resp = auth::register(&state, &meta.audit_context(None), meta.device(), body).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `POST /api/auth/login`: authenticate with email and password.
pub async fn login_handler(
    State(state): State<AppState>,
    meta: RequestMeta,
    ApiJson(body): ApiJson<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::login(
        &state,
        &meta.audit_context(None),
        meta.device(),
        &body.email,
        &body.password,
    )
    .await?;
    Ok(Json(resp))
}

/// `POST /api/auth/refresh`: exchange a refresh token for an access token.
/// The (possibly expired) access token travels in `Authorization`.
pub async fn refresh_handler(
    State(state): State<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let access = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let resp = auth::refresh(
        &state,
        &meta.audit_context(None),
        meta.device(),
        access,
        &body.refresh_token,
    )
    .await?;
    Ok(Json(resp))
}

/// `POST /api/auth/logout`: end this device's session, or all of them.
/// An empty body logs out the current device.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthContext>,
    meta: RequestMeta,
    bytes: Bytes,
) -> AppResult<Json<MessageResponse>> {
    let body: LogoutRequest = if bytes.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&bytes).map_err(|e| AppError::Validation(e.to_string()))?
    };
    let resp = auth::logout(
        &state,
        &meta.audit_context(Some(&user)),
        &user,
        meta.device(),
        body.logout_all,
    )
    .await?;
    Ok(Json(resp))
}

/// `GET /api/auth/me`
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthContext>,
) -> AppResult<Json<UserSummary>> {
    Ok(Json(auth::me(&state, &user).await?))
}

/// `POST /api/auth/change-password`
pub async fn change_password_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthContext>,
    meta: RequestMeta,
    ApiJson(body): ApiJson<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::change_password(
        &state,
        &meta.audit_context(Some(&user)),
        &user,
        &body.old,
        &body.new,
    )
    .await?;
    Ok(Json(resp))
}

/// `POST /api/auth/forgot-password`: always 200.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    meta: RequestMeta,
    ApiJson(body): ApiJson<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::forgot_password(&state, &meta.audit_context(None), &body.email).await?;
    Ok(Json(resp))
}

/// `POST /api/auth/reset-password`
pub async fn reset_password_handler(
    State(state): State<AppState>,
    meta: RequestMeta,
    ApiJson(body): ApiJson<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp =
        auth::reset_password(&state, &meta.audit_context(None), &body.token, &body.new).await?;
    Ok(Json(resp))
}

/// `DELETE /api/auth/delete-account`
pub async fn delete_account_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthContext>,
    meta: RequestMeta,
    ApiJson(body): ApiJson<DeleteAccountRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp =
        auth::delete_account(&state, &meta.audit_context(Some(&user)), &user, body).await?;
    Ok(Json(resp))
}

/// `GET /api/auth/sessions`
pub async fn sessions_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthContext>,
) -> AppResult<Json<SessionsResponse>> {
    Ok(Json(auth::list_sessions(&state, &user).await?))
}

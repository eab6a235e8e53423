//! Application error types.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;
use storefront_core::auth::{AuthError, PasswordError};
use storefront_core::kv::KvError;
use storefront_core::store::StoreError;
use thiserror::Error;
use tracing::error;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Generic body for credential failures.
pub const INVALID_CREDENTIALS: &str = "Email ou mot de passe incorrect";

/// Application-level errors with HTTP status mapping.
///
/// Every variant renders as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {permissions:?}")]
    Forbidden { permissions: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Duration,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn forbidden(permission: &str) -> Self {
        AppError::Forbidden {
            permissions: vec![permission.to_string()],
        }
    }

    pub fn unauthorized(message: &str) -> Self {
        AppError::Unauthorized(message.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, Json(json!({ "error": m }))),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, Json(json!({ "error": m }))),
            AppError::Forbidden { permissions } => {
                let body = match permissions.as_slice() {
                    [one] => json!({
                        "error": "Permission insuffisante",
                        "required_permission": one,
                    }),
                    many => json!({
                        "error": "Permission insuffisante",
                        "required_permissions": many,
                    }),
                };
                (StatusCode::FORBIDDEN, Json(body))
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, Json(json!({ "error": m }))),
            AppError::Conflict(m) => (StatusCode::CONFLICT, Json(json!({ "error": m }))),
            AppError::RateLimited {
                message,
                retry_after,
            } => {
                let secs = retry_after.as_secs().max(1);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": message, "retry_after": secs })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(secs));
                return response;
            }
            AppError::Upstream(m) => {
                error!(error = %m, "upstream failure");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "Service externe indisponible" })),
                )
            }
            AppError::Unavailable(m) => {
                error!(error = %m, "dependency unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "Service temporairement indisponible" })),
                )
            }
            AppError::Internal(m) => {
                error!(error = %m, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Erreur serveur" })),
                )
            }
        }
        .into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => AppError::NotFound(m),
            StoreError::Conflict(m) => AppError::Conflict(m),
            StoreError::Unavailable(m) => AppError::Unavailable(m),
            StoreError::Database(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::Protocol(m) => AppError::Internal(m),
            other => AppError::Unavailable(other.to_string()),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(e: PasswordError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::CredentialError => AppError::unauthorized(INVALID_CREDENTIALS),
            AuthError::TokenError(_) | AuthError::TokenExpired => {
                AppError::unauthorized("Token invalide")
            }
            AuthError::TokenRevoked => AppError::unauthorized("Token révoqué"),
            AuthError::ValidationError(m) => AppError::Validation(m),
            AuthError::Password(e) => AppError::from(e),
            AuthError::Store(e) => AppError::from(e),
            AuthError::Kv(e) => AppError::from(e),
            AuthError::Internal(m) => AppError::Internal(m),
        }
    }
}

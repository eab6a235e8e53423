//! HTTP request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_core::models::auth::Principal;
use storefront_core::sessions::SessionInfo;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Identity already verified by an external provider.
#[derive(Debug, Deserialize)]
pub struct FederatedLoginRequest {
    pub provider: String,
    pub provider_id: String,
    #[serde(default)]
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub logout_all: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(alias = "old_password")]
    pub old: String,
    #[serde(alias = "new_password")]
    pub new: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[serde(alias = "new_password")]
    pub new: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: Option<String>,
    #[serde(default, rename = "confirmDeletion", alias = "confirm_deletion")]
    pub confirm_deletion: bool,
}

/// Public view of a principal.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub provider: String,
    pub role: String,
    pub is_company_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Principal> for UserSummary {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id.clone(),
            email: p.email.clone(),
            name: p.name.clone(),
            provider: p.provider.clone(),
            role: p.role.clone(),
            is_company_admin: p.is_company_admin,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    pub token_type: &'static str,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present only when refresh tokens rotate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub token_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: String,
    pub role_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`.
    pub status: &'static str,
    pub kv: bool,
    pub database: bool,
    pub kv_fail_open: u64,
    pub audit_dropped: u64,
}

//! Authentication middleware: bearer token extraction, signature and
//! expiry check, then blacklist and ban lookups.

use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use storefront_core::audit::{AuditEntry, actions, resources};
use storefront_core::models::auth::{ADMIN_ROLE, AccessClaims};
use tracing::{debug, warn};

use super::meta::RequestMeta;
use crate::AppState;
use crate::error::AppError;

/// Authenticated caller, inserted into request extensions by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub is_company_admin: bool,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    /// Legacy role label check.
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    /// Time left on the presented access token.
    pub fn remaining_lifetime(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

impl From<AccessClaims> for AuthContext {
    fn from(claims: AccessClaims) -> Self {
        let expires_at = claims.expires_at();
        Self {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
            is_company_admin: claims.is_company_admin,
            token_id: claims.token_id,
            expires_at,
        }
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// `Ok(None)` when the header is absent, `Err` when it is present but not a
/// bearer credential.
pub fn bearer_token(request: &Request) -> Result<Option<&str>, AppError> {
    let Some(header) = request.headers().get(AUTHORIZATION) else {
        return Ok(None);
    };
    header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Some)
        .ok_or_else(|| AppError::unauthorized("Token invalide"))
}

/// Axum middleware: verifies the bearer token and injects [`AuthContext`].
///
/// Revocation lookups fail open unless configured otherwise; with fail-open
/// disabled an unreachable store answers 503.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = match bearer_token(&request)? {
        Some(token) => token,
        None => {
            debug!("no authorization header");
            return Err(AppError::unauthorized("Token manquant"));
        }
    };

    let claims = state.issuer.parse_access(token).map_err(|e| {
        debug!(reason = %e, "access token rejected");
        AppError::unauthorized("Token invalide")
    })?;

    let (blacklisted, banned) = tokio::join!(
        state.revocation.is_blacklisted(&claims.token_id),
        state.revocation.is_banned(&claims.user_id),
    );
    let (blacklisted, banned) = (blacklisted?, banned?);

    if blacklisted || banned {
        let reason = if banned { "user banned" } else { "token revoked" };
        warn!(user_id = %claims.user_id, token_id = %claims.token_id, reason, "revoked token presented");
        let meta = RequestMeta::from_parts(
            request.headers(),
            request.extensions(),
            state.config.trust_forwarded_headers,
        );
        let ctx = meta
            .audit_context(None)
            .for_user(&claims.user_id, &claims.email);
        metrics::counter!("storefront_tokens_rejected_total").increment(1);
        state.audit.log_failure(
            &ctx,
            AuditEntry::new(actions::TOKEN_REJECTED, resources::AUTH)
                .resource_id(claims.token_id.as_str()),
            reason,
        );
        return Err(AppError::unauthorized("Token révoqué"));
    }

    request.extensions_mut().insert(AuthContext::from(claims));
    Ok(next.run(request).await)
}

//! Request metadata: client address, user agent and device id.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use storefront_core::audit::AuditContext;

use super::auth::AuthContext;
use crate::AppState;

/// Header naming the client device; absent selects the legacy session slot.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Longest accepted device id.
const MAX_DEVICE_ID_LEN: usize = 128;

#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

impl RequestMeta {
    pub fn from_parts(headers: &HeaderMap, extensions: &Extensions, trust_forwarded: bool) -> Self {
        Self {
            ip: client_ip(headers, extensions, trust_forwarded),
            user_agent: header_str(headers, USER_AGENT.as_str()).map(str::to_string),
            device_id: device_id(headers),
        }
    }

    pub fn device(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Audit fields for this request, attributed to `auth` when present.
    pub fn audit_context(&self, auth: Option<&AuthContext>) -> AuditContext {
        AuditContext {
            user_id: auth.map(|a| a.user_id.clone()),
            email: auth.map(|a| a.email.clone()).filter(|e| !e.is_empty()),
            ip: Some(self.ip.clone()),
            user_agent: self.user_agent.clone(),
            session_id: auth.map(|a| a.token_id.clone()),
        }
    }
}

impl FromRequestParts<AppState> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(
            &parts.headers,
            &parts.extensions,
            state.config.trust_forwarded_headers,
        ))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The socket peer, unless `trust_forwarded` is set, in which case the
/// first hop of `X-Forwarded-For`, then `X-Real-IP`, take precedence.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_forwarded: bool) -> String {
    if trust_forwarded {
        if let Some(forwarded) = header_str(headers, "x-forwarded-for")
            && let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty())
        {
            return first.to_string();
        }
        if let Some(real) = header_str(headers, "x-real-ip") {
            return real.to_string();
        }
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn device_id(headers: &HeaderMap) -> Option<String> {
    header_str(headers, DEVICE_ID_HEADER)
        .filter(|d| d.len() <= MAX_DEVICE_ID_LEN && !d.contains(':'))
        .map(str::to_string)
}

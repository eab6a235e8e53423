//! Rate-limit interceptor.
//!
//! Runs [`RateLimiter::admit`] before the handler and
//! [`RateLimiter::record`] with the handler's outcome afterwards. The
//! subject depends on the scope: the submitted email for login and
//! password reset, the authenticated user for the cart, the client address
//! otherwise.

use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use storefront_core::models::auth::normalize_email;
use storefront_core::rate_limit::{Admission, Outcome, Scope};
use tracing::debug;

use super::auth::AuthContext;
use super::meta::client_ip;
use crate::AppState;
use crate::error::AppError;

/// Largest body buffered to read the subject email.
const MAX_BUFFERED_BODY: usize = 64 * 1024;

/// Layer state for [`enforce`].
#[derive(Clone)]
pub struct Throttle {
    state: AppState,
    scope: Scope,
}

pub fn limit(state: &AppState, scope: Scope) -> Throttle {
    Throttle {
        state: state.clone(),
        scope,
    }
}

pub async fn enforce(
    State(throttle): State<Throttle>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Throttle { state, scope } = throttle;
    let trust_forwarded = state.config.trust_forwarded_headers;
    let (subject, request) = subject_of(scope, request, trust_forwarded).await?;
    let Some(subject) = subject else {
        return Ok(next.run(request).await);
    };

    let limiter = &state.limiter;
    let (count, limit) = match limiter.admit(scope, &subject).await {
        Admission::Allowed { count, limit } => (count, limit),
        Admission::Rejected { retry_after } => {
            debug!(scope = %scope, subject = %subject, ?retry_after, "rate limited");
            metrics::counter!("storefront_rate_limited_total", "scope" => scope.as_str())
                .increment(1);
            return Err(AppError::RateLimited {
                message: rejection_message(scope, retry_after),
                retry_after,
            });
        }
    };

    let mut response = next.run(request).await;
    limiter
        .record(scope, &subject, outcome_of(response.status()))
        .await;

    if limiter.limits().policy(scope).cooldown.is_none() {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
        headers.insert(
            "x-ratelimit-remaining",
            HeaderValue::from(limit.saturating_sub(count.saturating_add(1))),
        );
    }
    Ok(response)
}

/// Resolve the subject, buffering the body when the email is needed.
/// `None` skips throttling, as when the body carries no email.
async fn subject_of(
    scope: Scope,
    request: Request,
    trust_forwarded: bool,
) -> Result<(Option<String>, Request), AppError> {
    match scope {
        Scope::Login | Scope::Forgot => {
            let (parts, body) = request.into_parts();
            let bytes = to_bytes(body, MAX_BUFFERED_BODY)
                .await
                .map_err(|_| AppError::Validation("Corps de requête invalide".into()))?;
            let email = serde_json::from_slice::<serde_json::Value>(&bytes)
                .ok()
                .and_then(|v| v.get("email").and_then(|e| e.as_str()).map(normalize_email))
                .filter(|e| !e.is_empty());
            Ok((email, Request::from_parts(parts, Body::from(bytes))))
        }
        Scope::Cart => {
            let user = request
                .extensions()
                .get::<AuthContext>()
                .map(|a| a.user_id.clone());
            Ok((user, request))
        }
        Scope::Register | Scope::Api | Scope::Search => {
            let ip = client_ip(request.headers(), request.extensions(), trust_forwarded);
            Ok((Some(ip), request))
        }
    }
}

fn outcome_of(status: StatusCode) -> Outcome {
    if status.is_success() {
        Outcome::Success
    } else if status == StatusCode::UNAUTHORIZED {
        Outcome::Failure
    } else {
        Outcome::Other
    }
}

fn rejection_message(scope: Scope, retry_after: Duration) -> String {
    let minutes = retry_after.as_secs().div_ceil(60).max(1);
    let wait = if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{minutes} minutes")
    };
    match scope {
        Scope::Login => format!("Trop de tentatives échouées. Réessayez dans {wait}"),
        Scope::Register => format!("Trop d'inscriptions. Réessayez dans {wait}"),
        Scope::Forgot => format!("Trop de demandes. Réessayez dans {wait}"),
        Scope::Api => format!("Trop de requêtes. Réessayez dans {wait}"),
        Scope::Search => format!("Trop de recherches. Réessayez dans {wait}"),
        Scope::Cart => "Trop d'ajouts au panier. Ralentissez un peu".to_string(),
    }
}

//! Permission guards.
//!
//! Each guard is the state of a `from_fn_with_state` layer running
//! [`enforce`], placed inside [`require_auth`](super::auth::require_auth):
//!
//! ```ignore
//! .route_layer(from_fn_with_state(rbac::require(&state, ORDERS_REFUND), rbac::enforce))
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use storefront_core::audit::{AuditEntry, actions, resources};
use tracing::info;

use super::auth::AuthContext;
use super::meta::RequestMeta;
use crate::AppState;
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
enum Requirement {
    Permission(&'static str),
    AnyOf(&'static [&'static str]),
    /// Legacy `role == "admin"` claim, for tokens minted before RBAC.
    LegacyAdmin,
}

/// Layer state for [`enforce`].
#[derive(Clone)]
pub struct Guard {
    state: AppState,
    requirement: Requirement,
}

/// Allow callers holding `permission`.
pub fn require(state: &AppState, permission: &'static str) -> Guard {
    Guard {
        state: state.clone(),
        requirement: Requirement::Permission(permission),
    }
}

/// Allow callers holding at least one of `permissions`.
pub fn require_any(state: &AppState, permissions: &'static [&'static str]) -> Guard {
    Guard {
        state: state.clone(),
        requirement: Requirement::AnyOf(permissions),
    }
}

/// Allow callers whose token carries the legacy admin role.
pub fn require_admin(state: &AppState) -> Guard {
    Guard {
        state: state.clone(),
        requirement: Requirement::LegacyAdmin,
    }
}

pub async fn enforce(
    State(guard): State<Guard>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth = request
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Token manquant"))?;

    let (allowed, required): (bool, Vec<String>) = match guard.requirement {
        Requirement::Permission(p) => (
            guard.state.permissions.has(&auth.user_id, p).await?,
            vec![p.to_string()],
        ),
        Requirement::AnyOf(ps) => (
            guard.state.permissions.has_any(&auth.user_id, ps).await?,
            ps.iter().map(|p| p.to_string()).collect(),
        ),
        Requirement::LegacyAdmin => (auth.is_admin(), vec!["admin".to_string()]),
    };

    if allowed {
        return Ok(next.run(request).await);
    }

    info!(user_id = %auth.user_id, path = %request.uri().path(), ?required, "permission denied");
    let meta = RequestMeta::from_parts(
        request.headers(),
        request.extensions(),
        guard.state.config.trust_forwarded_headers,
    );
    guard.state.audit.log_failure(
        &meta.audit_context(Some(&auth)),
        AuditEntry::new(actions::PERMISSION_DENIED, resources::AUTH)
            .resource_id(request.uri().path())
            .new_value(json!({ "required": required })),
        "permission denied",
    );
    Err(AppError::Forbidden {
        permissions: required,
    })
}

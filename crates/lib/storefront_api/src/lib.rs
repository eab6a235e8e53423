//! # storefront_api
//!
//! HTTP API for the storefront session, authorization and rate-limit core.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use sqlx::PgPool;
use storefront_core::account::{AccountPurger, StorePurger};
use storefront_core::audit::{AuditSink, AuditStore};
use storefront_core::auth::jwt::TokenIssuer;
use storefront_core::auth::password::CredentialHasher;
use storefront_core::kv::{FailOpenCounter, SharedKv};
use storefront_core::mail::{LogMailer, Mailer};
use storefront_core::rate_limit::{RateLimiter, Scope};
use storefront_core::rbac::PermissionResolver;
use storefront_core::rbac::catalog::{ADMIN_LOGS, ADMIN_ROLES};
use storefront_core::revocation::RevocationStore;
use storefront_core::sessions::SessionStore;
use storefront_core::store::UserStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{admin, audit, auth, health, roles};
use crate::middleware::{rate_limit, rbac};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub issuer: TokenIssuer,
    pub hasher: CredentialHasher,
    pub sessions: SessionStore,
    pub revocation: RevocationStore,
    pub limiter: RateLimiter,
    pub permissions: PermissionResolver,
    pub audit: AuditSink,
    /// Durable principals, roles and assignments.
    pub users: Arc<dyn UserStore>,
    /// Read side of the audit trail.
    pub audit_log: Arc<dyn AuditStore>,
    pub kv: SharedKv,
    pub mailer: Arc<dyn Mailer>,
    pub purger: Arc<dyn AccountPurger>,
    /// KV failures tolerated by revocation and rate-limit checks.
    pub kv_failures: FailOpenCounter,
}

impl AppState {
    /// Wire every component over the given backends.
    ///
    /// Spawns the audit writers, so this must run inside a Tokio runtime.
    pub fn new(
        config: ApiConfig,
        users: Arc<dyn UserStore>,
        audit_log: Arc<dyn AuditStore>,
        kv: SharedKv,
    ) -> Self {
        let kv_failures = FailOpenCounter::new();
        let audit = AuditSink::spawn(
            Arc::clone(&audit_log),
            config.audit_queue_capacity,
            config.audit_workers,
        );
        Self {
            issuer: TokenIssuer::new(config.jwt_secret.as_bytes(), config.access_ttl),
            hasher: CredentialHasher::new(config.argon2),
            sessions: SessionStore::new(Arc::clone(&kv)),
            revocation: RevocationStore::new(
                Arc::clone(&kv),
                config.revocation_fail_open,
                kv_failures.clone(),
            ),
            limiter: RateLimiter::new(
                Arc::clone(&kv),
                config.rate_limits.clone(),
                kv_failures.clone(),
            ),
            permissions: PermissionResolver::new(Arc::clone(&users), config.permission_cache_ttl),
            audit,
            purger: Arc::new(StorePurger::new(Arc::clone(&users), Arc::clone(&kv))),
            mailer: Arc::new(LogMailer),
            users,
            audit_log,
            kv,
            kv_failures,
            config: Arc::new(config),
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_purger(mut self, purger: Arc<dyn AccountPurger>) -> Self {
        self.purger = purger;
        self
    }
}

/// Bring the user and audit schema up to date on `pool`.
pub async fn migrate(pool: &PgPool) -> Result<(), storefront_core::migrate::MigrationError> {
    storefront_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let throttle =
        |scope: Scope| from_fn_with_state(rate_limit::limit(&state, scope), rate_limit::enforce);

    // Public routes (no auth required)
    let public = Router::new()
        .route(
            "/api/auth/register",
            post(auth::register_handler).route_layer(throttle(Scope::Register)),
        )
        .route(
            "/api/auth/login",
            post(auth::login_handler).route_layer(throttle(Scope::Login)),
        )
        .route("/api/auth/refresh", post(auth::refresh_handler))
        .route(
            "/api/auth/forgot-password",
            post(auth::forgot_password_handler).route_layer(throttle(Scope::Forgot)),
        )
        .route("/api/auth/reset-password", post(auth::reset_password_handler));

    let account = Router::new()
        .route("/api/auth/logout", post(auth::logout_handler))
        .route("/api/auth/me", get(auth::me_handler))
        .route(
            "/api/auth/change-password",
            post(auth::change_password_handler),
        )
        .route(
            "/api/auth/delete-account",
            delete(auth::delete_account_handler),
        )
        .route("/api/auth/sessions", get(auth::sessions_handler))
        .route("/api/me/permissions", get(roles::my_permissions_handler));

    let legacy_admin = Router::new()
        .route("/api/admin/users/{id}/ban", post(admin::ban_handler))
        .route("/api/admin/users/{id}/unban", post(admin::unban_handler))
        .route(
            "/api/admin/users/{id}/sessions",
            delete(admin::revoke_sessions_handler),
        )
        .route_layer(from_fn_with_state(
            rbac::require_admin(&state),
            rbac::enforce,
        ));

    let role_admin = Router::new()
        .route(
            "/api/admin/roles",
            post(roles::create_role_handler).get(roles::list_roles_handler),
        )
        .route("/api/admin/roles/assign", post(roles::assign_role_handler))
        .route(
            "/api/admin/roles/{id}/disable",
            post(roles::disable_role_handler),
        )
        .route("/api/admin/users/{id}/roles", get(roles::user_roles_handler))
        .route(
            "/api/admin/users/{id}/roles/{role_id}",
            delete(roles::revoke_role_handler),
        )
        .route_layer(from_fn_with_state(
            rbac::require(&state, ADMIN_ROLES),
            rbac::enforce,
        ));

    let audit_admin = Router::new()
        .route("/api/admin/audit-logs", get(audit::list_audit_logs_handler))
        .route_layer(from_fn_with_state(
            rbac::require(&state, ADMIN_LOGS),
            rbac::enforce,
        ));

    // Protected routes (require auth)
    let protected = Router::new()
        .merge(account)
        .merge(legacy_admin)
        .merge(role_admin)
        .merge(audit_admin)
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    let api = Router::new()
        .merge(public)
        .merge(protected)
        .route_layer(throttle(Scope::Api));

    Router::new()
        .route("/api/health", get(health::health_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

//! Authentication domain models.
//!
//! Internal domain models, distinct from the HTTP request/response DTOs in
//! `storefront_api`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration origin of locally created accounts.
pub const LOCAL_PROVIDER: &str = "local";

/// Legacy role label carried in access tokens before RBAC existed.
pub const DEFAULT_ROLE: &str = "user";

/// Legacy role label that unlocks `require_admin` routes.
pub const ADMIN_ROLE: &str = "admin";

/// Registered identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    /// Case-folded; empty for federated accounts without an email.
    pub email: String,
    pub name: Option<String>,
    /// `"local"` or a federated identity provider tag.
    pub provider: String,
    pub provider_id: Option<String>,
    /// Encoded credential for local accounts.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: String,
    pub is_company_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    pub fn is_local(&self) -> bool {
        self.provider == LOCAL_PROVIDER
    }
}

/// Fields required to create a principal.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub name: Option<String>,
    pub provider: String,
    pub provider_id: Option<String>,
    pub password_hash: Option<String>,
    pub role: String,
    pub is_company_admin: bool,
}

impl NewPrincipal {
    /// A local account with a password credential and the default role.
    pub fn local(email: &str, name: Option<&str>, password_hash: String) -> Self {
        Self {
            email: normalize_email(email),
            name: name.map(str::to_string),
            provider: LOCAL_PROVIDER.to_string(),
            provider_id: None,
            password_hash: Some(password_hash),
            role: DEFAULT_ROLE.to_string(),
            is_company_admin: false,
        }
    }
}

/// Case-fold an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Claims embedded in signed access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub is_company_admin: bool,
    /// Fresh per mint; the blacklist key.
    pub token_id: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl AccessClaims {
    /// Time left until `exp`, zero once expired.
    pub fn remaining_lifetime(&self) -> Duration {
        let secs = self.exp - Utc::now().timestamp();
        Duration::from_secs(secs.max(0) as u64)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

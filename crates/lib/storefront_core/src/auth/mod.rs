//! Authentication primitives.
//!
//! Password hashing with legacy migration, signed access tokens and opaque
//! refresh tokens. Shared by the API layer and any other process that needs
//! to mint or check credentials.

pub mod jwt;
pub mod password;

use thiserror::Error;

use crate::kv::KvError;
use crate::store::StoreError;

pub use password::PasswordError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Password error: {0}")]
    Password(#[from] PasswordError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Key-value error: {0}")]
    Kv(#[from] KvError),

    #[error("Internal error: {0}")]
    Internal(String),
}

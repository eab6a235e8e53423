//! # storefront_core
//!
//! Session, authorization and rate-limit core of the storefront backend:
//! credentials, tokens, refresh sessions, revocation, throttling, RBAC and
//! the audit trail. HTTP concerns live in `storefront_api`.

pub mod account;
pub mod audit;
pub mod auth;
pub mod ids;
pub mod kv;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod rbac;
pub mod revocation;
pub mod sessions;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Request-scoped interceptors: auth pipeline, rate limiting, RBAC guards
//! and request metadata.

pub mod auth;
pub mod meta;
pub mod rate_limit;
pub mod rbac;

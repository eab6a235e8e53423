//! Domain models shared across the core subsystems.

pub mod auth;
pub mod rbac;

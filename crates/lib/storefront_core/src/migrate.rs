//! Schema for principals, roles, role grants and the audit trail.
//!
//! `0001` creates `users`, `roles` and `user_roles`; `0002` creates
//! `audit_logs`. A separate audit database receives the full set too, so
//! either pool can serve both stores.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};
use thiserror::Error;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
#[error("storefront schema migration failed: {0}")]
pub struct MigrationError(#[from] MigrateError);

/// Bring the storefront schema up to date.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrationError> {
    MIGRATOR.run(pool).await?;
    info!(
        version = MIGRATOR.iter().map(|m| m.version).max().unwrap_or_default(),
        "storefront schema up to date"
    );
    Ok(())
}

//! Durable user store: principals, roles and role assignments.
//!
//! [`PgUserStore`] is the production backend; [`MemoryUserStore`] backs
//! development runs and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{NewPrincipal, Principal};
use crate::models::rbac::{NewAssignment, NewRole, Role, RoleAssignment};

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".into()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a principal. `Conflict` when the (non-empty) email is taken.
    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Principal>>;
    async fn find_by_id(&self, user_id: &str) -> StoreResult<Option<Principal>>;
    async fn find_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> StoreResult<Option<Principal>>;
    async fn update_password_hash(&self, user_id: &str, hash: &str) -> StoreResult<()>;
    async fn delete_principal(&self, user_id: &str) -> StoreResult<()>;

    /// Insert a role. `Conflict` when the name is taken.
    async fn create_role(&self, role: NewRole) -> StoreResult<Role>;
    async fn find_role(&self, role_id: &str) -> StoreResult<Option<Role>>;
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
    async fn set_role_active(&self, role_id: &str, active: bool) -> StoreResult<()>;

    /// Grant a role. `Conflict` when an active assignment already exists.
    async fn assign_role(&self, assignment: NewAssignment) -> StoreResult<RoleAssignment>;
    /// Deactivate the active assignment. `NotFound` when there is none.
    async fn revoke_role(&self, user_id: &str, role_id: &str) -> StoreResult<()>;
    /// Active assignments, expired ones included.
    async fn assignments_of(&self, user_id: &str) -> StoreResult<Vec<RoleAssignment>>;
    /// Active roles referenced by active assignments not expired at `now`.
    async fn granted_roles(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Vec<Role>>;
    async fn delete_assignments_of(&self, user_id: &str) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}

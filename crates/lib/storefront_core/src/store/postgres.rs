//! Postgres-backed user store.
//!
//! Runtime-checked `sqlx` queries against the schema in `migrations/`.
//! Every call carries the store deadline; a query that overruns it surfaces
//! as [`StoreError::Unavailable`] so the credential path fails closed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{StoreError, StoreResult, UserStore};
use crate::models::auth::{NewPrincipal, Principal};
use crate::models::rbac::{NewAssignment, NewRole, Role, RoleAssignment};
use crate::ids::{new_id, parse_id};

/// Default per-query deadline.
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(5);

const PRINCIPAL_COLUMNS: &str = "id::text, email, name, provider, provider_id, password_hash, \
                                 role, is_company_admin, created_at";

const ROLE_COLUMNS: &str =
    "id::text, name, display_name, description, permissions, is_active, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str = "id::text, user_id::text, role_id::text, granted_by::text, \
                                  granted_at, expires_at, is_active";

#[derive(sqlx::FromRow)]
struct PrincipalRow {
    id: String,
    email: Option<String>,
    name: Option<String>,
    provider: String,
    provider_id: Option<String>,
    password_hash: Option<String>,
    role: String,
    is_company_admin: bool,
    created_at: DateTime<Utc>,
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        Principal {
            id: row.id,
            email: row.email.unwrap_or_default(),
            name: row.name,
            provider: row.provider,
            provider_id: row.provider_id,
            password_hash: row.password_hash,
            role: row.role,
            is_company_admin: row.is_company_admin,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: String,
    name: String,
    display_name: String,
    description: Option<String>,
    permissions: Vec<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            description: row.description,
            permissions: row.permissions,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: String,
    user_id: String,
    role_id: String,
    granted_by: Option<String>,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
}

impl From<AssignmentRow> for RoleAssignment {
    fn from(row: AssignmentRow) -> Self {
        RoleAssignment {
            id: row.id,
            user_id: row.user_id,
            role_id: row.role_id,
            granted_by: row.granted_by,
            granted_at: row.granted_at,
            expires_at: row.expires_at,
            is_active: row.is_active,
        }
    }
}

/// Store over a shared `PgPool`.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_timeout(pool, DEFAULT_DB_TIMEOUT)
    }

    pub fn with_timeout(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, sqlx::Error>> + Send,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Unavailable("database call timed out".into())),
        }
    }

    async fn principal_where(&self, clause: &str, arg: &str) -> StoreResult<Option<Principal>> {
        let sql = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE {clause}");
        let row = self
            .bounded(
                sqlx::query_as::<_, PrincipalRow>(&sql)
                    .bind(arg)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Principal::from))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal> {
        let sql = format!(
            "INSERT INTO users (email, name, provider, provider_id, password_hash, role, is_company_admin) \
             VALUES (NULLIF($1, ''), $2, $3, $4, $5, $6, $7) RETURNING {PRINCIPAL_COLUMNS}"
        );
        let row = self
            .bounded(
                sqlx::query_as::<_, PrincipalRow>(&sql)
                    .bind(&new.email)
                    .bind(&new.name)
                    .bind(&new.provider)
                    .bind(&new.provider_id)
                    .bind(&new.password_hash)
                    .bind(&new.role)
                    .bind(new.is_company_admin)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(row.into())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Principal>> {
        if email.is_empty() {
            return Ok(None);
        }
        self.principal_where("email = $1", email).await
    }

    async fn find_by_id(&self, user_id: &str) -> StoreResult<Option<Principal>> {
        let Some(id) = parse_id(user_id) else {
            return Ok(None);
        };
        let sql = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE id = $1");
        let row = self
            .bounded(
                sqlx::query_as::<_, PrincipalRow>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Principal::from))
    }

    async fn find_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> StoreResult<Option<Principal>> {
        let sql = format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM users WHERE provider = $1 AND provider_id = $2"
        );
        let row = self
            .bounded(
                sqlx::query_as::<_, PrincipalRow>(&sql)
                    .bind(provider)
                    .bind(provider_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Principal::from))
    }

    async fn update_password_hash(&self, user_id: &str, hash: &str) -> StoreResult<()> {
        let not_found = || StoreError::NotFound(format!("user {user_id}"));
        let id = parse_id(user_id).ok_or_else(not_found)?;
        let result = self
            .bounded(
                sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
                    .bind(id)
                    .bind(hash)
                    .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    async fn delete_principal(&self, user_id: &str) -> StoreResult<()> {
        let not_found = || StoreError::NotFound(format!("user {user_id}"));
        let id = parse_id(user_id).ok_or_else(not_found)?;
        let result = self
            .bounded(
                sqlx::query("DELETE FROM users WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    async fn create_role(&self, role: NewRole) -> StoreResult<Role> {
        let sql = format!(
            "INSERT INTO roles (id, name, display_name, description, permissions) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ROLE_COLUMNS}"
        );
        let row = self
            .bounded(
                sqlx::query_as::<_, RoleRow>(&sql)
                    .bind(new_id())
                    .bind(&role.name)
                    .bind(&role.display_name)
                    .bind(&role.description)
                    .bind(&role.permissions)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(row.into())
    }

    async fn find_role(&self, role_id: &str) -> StoreResult<Option<Role>> {
        let Some(id) = parse_id(role_id) else {
            return Ok(None);
        };
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        let row = self
            .bounded(
                sqlx::query_as::<_, RoleRow>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Role::from))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1");
        let row = self
            .bounded(
                sqlx::query_as::<_, RoleRow>(&sql)
                    .bind(name)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Role::from))
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name");
        let rows = self
            .bounded(sqlx::query_as::<_, RoleRow>(&sql).fetch_all(&self.pool))
            .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn set_role_active(&self, role_id: &str, active: bool) -> StoreResult<()> {
        let not_found = || StoreError::NotFound(format!("role {role_id}"));
        let id = parse_id(role_id).ok_or_else(not_found)?;
        let result = self
            .bounded(
                sqlx::query("UPDATE roles SET is_active = $2, updated_at = now() WHERE id = $1")
                    .bind(id)
                    .bind(active)
                    .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    async fn assign_role(&self, assignment: NewAssignment) -> StoreResult<RoleAssignment> {
        let not_found = || StoreError::NotFound("user or role".into());
        let user_id = parse_id(&assignment.user_id).ok_or_else(not_found)?;
        let role_id = parse_id(&assignment.role_id).ok_or_else(not_found)?;
        let granted_by = match assignment.granted_by.as_deref() {
            Some(granter) => Some(
                parse_id(granter).ok_or_else(|| StoreError::NotFound(format!("user {granter}")))?,
            ),
            None => None,
        };
        let sql = format!(
            "INSERT INTO user_roles (id, user_id, role_id, granted_by, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ASSIGNMENT_COLUMNS}"
        );
        let row = self
            .bounded(
                sqlx::query_as::<_, AssignmentRow>(&sql)
                    .bind(new_id())
                    .bind(user_id)
                    .bind(role_id)
                    .bind(granted_by)
                    .bind(assignment.expires_at)
                    .fetch_one(&self.pool),
            )
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => StoreError::Conflict("role already assigned".into()),
                StoreError::Database(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                    not_found()
                }
                other => other,
            })?;
        Ok(row.into())
    }

    async fn revoke_role(&self, user_id: &str, role_id: &str) -> StoreResult<()> {
        let not_found = || StoreError::NotFound("active assignment".into());
        let (Some(user_id), Some(role_id)) = (parse_id(user_id), parse_id(role_id)) else {
            return Err(not_found());
        };
        let result = self
            .bounded(
                sqlx::query(
                    "UPDATE user_roles SET is_active = FALSE \
                     WHERE user_id = $1 AND role_id = $2 AND is_active",
                )
                .bind(user_id)
                .bind(role_id)
                .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    async fn assignments_of(&self, user_id: &str) -> StoreResult<Vec<RoleAssignment>> {
        let Some(user_id) = parse_id(user_id) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM user_roles \
             WHERE user_id = $1 AND is_active ORDER BY granted_at"
        );
        let rows = self
            .bounded(
                sqlx::query_as::<_, AssignmentRow>(&sql)
                    .bind(user_id)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(RoleAssignment::from).collect())
    }

    async fn granted_roles(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Vec<Role>> {
        let Some(user_id) = parse_id(user_id) else {
            return Ok(Vec::new());
        };
        let rows = self
            .bounded(
                sqlx::query_as::<_, RoleRow>(
                    "SELECT DISTINCT r.id::text, r.name, r.display_name, r.description, \
                            r.permissions, r.is_active, r.created_at, r.updated_at \
                     FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
                     WHERE ur.user_id = $1 AND ur.is_active AND r.is_active \
                       AND (ur.expires_at IS NULL OR ur.expires_at > $2)",
                )
                .bind(user_id)
                .bind(now)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn delete_assignments_of(&self, user_id: &str) -> StoreResult<u64> {
        let Some(user_id) = parse_id(user_id) else {
            return Ok(0);
        };
        let result = self
            .bounded(
                sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.bounded(sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }
}

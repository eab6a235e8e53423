//! In-memory user store.
//!
//! `HashMap`s guarded by a single `tokio::sync::RwLock`. Not durable; used
//! for local development and tests. Enforces the same uniqueness rules as
//! the Postgres schema.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{StoreError, StoreResult, UserStore};
use crate::models::auth::{NewPrincipal, Principal};
use crate::models::rbac::{NewAssignment, NewRole, Role, RoleAssignment};
use crate::ids::new_id;

#[derive(Debug, Default)]
struct Inner {
    principals: HashMap<String, Principal>,
    roles: HashMap<String, Role>,
    assignments: Vec<RoleAssignment>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryUserStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal> {
        let mut inner = self.inner.write().await;
        if !new.email.is_empty() && inner.principals.values().any(|p| p.email == new.email) {
            return Err(StoreError::Conflict(format!("email {} exists", new.email)));
        }
        let principal = Principal {
            id: new_id().to_string(),
            email: new.email,
            name: new.name,
            provider: new.provider,
            provider_id: new.provider_id,
            password_hash: new.password_hash,
            role: new.role,
            is_company_admin: new.is_company_admin,
            created_at: Utc::now(),
        };
        inner
            .principals
            .insert(principal.id.clone(), principal.clone());
        Ok(principal)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Principal>> {
        if email.is_empty() {
            return Ok(None);
        }
        let inner = self.inner.read().await;
        Ok(inner.principals.values().find(|p| p.email == email).cloned())
    }

    async fn find_by_id(&self, user_id: &str) -> StoreResult<Option<Principal>> {
        Ok(self.inner.read().await.principals.get(user_id).cloned())
    }

    async fn find_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> StoreResult<Option<Principal>> {
        let inner = self.inner.read().await;
        Ok(inner
            .principals
            .values()
            .find(|p| p.provider == provider && p.provider_id.as_deref() == Some(provider_id))
            .cloned())
    }

    async fn update_password_hash(&self, user_id: &str, hash: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let principal = inner
            .principals
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        principal.password_hash = Some(hash.to_string());
        Ok(())
    }

    async fn delete_principal(&self, user_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .principals
            .remove(user_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
    }

    async fn create_role(&self, role: NewRole) -> StoreResult<Role> {
        let mut inner = self.inner.write().await;
        if inner.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Conflict(format!("role {} exists", role.name)));
        }
        let now = Utc::now();
        let role = Role {
            id: new_id().to_string(),
            name: role.name,
            display_name: role.display_name,
            description: role.description,
            permissions: role.permissions,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn find_role(&self, role_id: &str) -> StoreResult<Option<Role>> {
        Ok(self.inner.read().await.roles.get(role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let inner = self.inner.read().await;
        Ok(inner.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.inner.read().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn set_role_active(&self, role_id: &str, active: bool) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let role = inner
            .roles
            .get_mut(role_id)
            .ok_or_else(|| StoreError::NotFound(format!("role {role_id}")))?;
        role.is_active = active;
        role.updated_at = Utc::now();
        Ok(())
    }

    async fn assign_role(&self, assignment: NewAssignment) -> StoreResult<RoleAssignment> {
        let mut inner = self.inner.write().await;
        if !inner.roles.contains_key(&assignment.role_id) {
            return Err(StoreError::NotFound(format!("role {}", assignment.role_id)));
        }
        if !inner.principals.contains_key(&assignment.user_id) {
            return Err(StoreError::NotFound(format!("user {}", assignment.user_id)));
        }
        if inner.assignments.iter().any(|a| {
            a.is_active && a.user_id == assignment.user_id && a.role_id == assignment.role_id
        }) {
            return Err(StoreError::Conflict("role already assigned".into()));
        }
        let record = RoleAssignment {
            id: new_id().to_string(),
            user_id: assignment.user_id,
            role_id: assignment.role_id,
            granted_by: assignment.granted_by,
            granted_at: Utc::now(),
            expires_at: assignment.expires_at,
            is_active: true,
        };
        inner.assignments.push(record.clone());
        Ok(record)
    }

    async fn revoke_role(&self, user_id: &str, role_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let assignment = inner
            .assignments
            .iter_mut()
            .find(|a| a.is_active && a.user_id == user_id && a.role_id == role_id)
            .ok_or_else(|| StoreError::NotFound("active assignment".into()))?;
        assignment.is_active = false;
        Ok(())
    }

    async fn assignments_of(&self, user_id: &str) -> StoreResult<Vec<RoleAssignment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .assignments
            .iter()
            .filter(|a| a.is_active && a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn granted_roles(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Vec<Role>> {
        let inner = self.inner.read().await;
        let mut roles: Vec<Role> = inner
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id && a.is_live(now))
            .filter_map(|a| inner.roles.get(&a.role_id))
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        roles.dedup_by(|a, b| a.id == b.id);
        Ok(roles)
    }

    async fn delete_assignments_of(&self, user_id: &str) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.assignments.len();
        inner.assignments.retain(|a| a.user_id != user_id);
        Ok((before - inner.assignments.len()) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

//! Role administration: create, assign, revoke and disable roles.
//!
//! Every mutation is audited and drops the affected permission memos.

use std::collections::BTreeSet;

use serde_json::json;
use storefront_core::audit::{AuditContext, AuditEntry, actions, resources};
use storefront_core::models::rbac::{NewAssignment, NewRole, Role, RoleAssignment};
use storefront_core::rbac::catalog;
use storefront_core::store::StoreError;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthContext;
use crate::models::{AssignRoleRequest, PermissionsResponse};

fn is_valid_role_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub async fn create_role(
    state: &AppState,
    ctx: &AuditContext,
    mut role: NewRole,
) -> AppResult<Role> {
    role.name = role.name.trim().to_string();
    if !is_valid_role_name(&role.name) {
        return Err(AppError::Validation(
            "Nom de rôle invalide (minuscules, chiffres et _)".into(),
        ));
    }
    if let Some(unknown) = role.permissions.iter().find(|p| !catalog::is_known(p)) {
        return Err(AppError::Validation(format!("Permission inconnue: {unknown}")));
    }
    let unique: BTreeSet<String> = role.permissions.drain(..).collect();
    role.permissions = unique.into_iter().collect();
    if role.display_name.trim().is_empty() {
        role.display_name = role.name.clone();
    }

    let role = match state.users.create_role(role).await {
        Ok(r) => r,
        Err(StoreError::Conflict(_)) => {
            return Err(AppError::Conflict("Ce rôle existe déjà".into()));
        }
        Err(e) => return Err(e.into()),
    };

    info!(role = %role.name, "role created");
    state.audit.log(
        ctx,
        AuditEntry::new(actions::ROLE_CREATE, resources::ROLE)
            .resource_id(role.id.as_str())
            .new_value(json!({ "name": role.name, "permissions": role.permissions })),
    );
    Ok(role)
}

pub async fn list_roles(state: &AppState) -> AppResult<Vec<Role>> {
    Ok(state.users.list_roles().await?)
}

pub async fn assign_role(
    state: &AppState,
    ctx: &AuditContext,
    granted_by: &AuthContext,
    req: AssignRoleRequest,
) -> AppResult<RoleAssignment> {
    let role = state
        .users
        .find_role(&req.role_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Rôle introuvable".into()))?;
    if !role.is_active {
        return Err(AppError::Validation("Ce rôle est désactivé".into()));
    }
    if let Some(expires_at) = req.expires_at
        && expires_at <= chrono::Utc::now()
    {
        return Err(AppError::Validation(
            "La date d'expiration doit être dans le futur".into(),
        ));
    }

    let assignment = match state
        .users
        .assign_role(NewAssignment {
            user_id: req.user_id.clone(),
            role_id: role.id.clone(),
            granted_by: Some(granted_by.user_id.clone()),
            expires_at: req.expires_at,
        })
        .await
    {
        Ok(a) => a,
        Err(StoreError::Conflict(_)) => {
            return Err(AppError::Conflict("Rôle déjà attribué".into()));
        }
        Err(StoreError::NotFound(_)) => {
            return Err(AppError::NotFound("Utilisateur introuvable".into()));
        }
        Err(e) => return Err(e.into()),
    };
    state.permissions.invalidate(&req.user_id);

    info!(user_id = %req.user_id, role = %role.name, "role assigned");
    state.audit.log(
        ctx,
        AuditEntry::new(actions::ROLE_ASSIGN, resources::ROLE)
            .resource_id(role.id.as_str())
            .new_value(json!({
                "user_id": req.user_id,
                "role": role.name,
                "expires_at": req.expires_at,
            })),
    );
    Ok(assignment)
}

/// Soft revoke: the assignment stays on record, inactive.
pub async fn revoke_role(
    state: &AppState,
    ctx: &AuditContext,
    user_id: &str,
    role_id: &str,
) -> AppResult<()> {
    match state.users.revoke_role(user_id, role_id).await {
        Ok(()) => {}
        Err(StoreError::NotFound(_)) => {
            return Err(AppError::NotFound("Attribution introuvable".into()));
        }
        Err(e) => return Err(e.into()),
    }
    state.permissions.invalidate(user_id);
    state.audit.log(
        ctx,
        AuditEntry::new(actions::ROLE_REVOKE, resources::ROLE)
            .resource_id(role_id)
            .old_value(json!({ "user_id": user_id })),
    );
    Ok(())
}

pub async fn roles_of_user(state: &AppState, user_id: &str) -> AppResult<Vec<RoleAssignment>> {
    Ok(state.users.assignments_of(user_id).await?)
}

/// Deactivate a role for every holder. Assignments are kept.
pub async fn disable_role(state: &AppState, ctx: &AuditContext, role_id: &str) -> AppResult<()> {
    match state.users.set_role_active(role_id, false).await {
        Ok(()) => {}
        Err(StoreError::NotFound(_)) => return Err(AppError::NotFound("Rôle introuvable".into())),
        Err(e) => return Err(e.into()),
    }
    state.permissions.invalidate_all();
    state.audit.log(
        ctx,
        AuditEntry::new(actions::ROLE_DISABLE, resources::ROLE)
            .resource_id(role_id)
            .new_value(json!({ "is_active": false })),
    );
    Ok(())
}

pub async fn my_permissions(state: &AppState, auth: &AuthContext) -> AppResult<PermissionsResponse> {
    let permissions = state.permissions.permissions_of(&auth.user_id).await?;
    Ok(PermissionsResponse {
        permissions: permissions.iter().cloned().collect(),
    })
}

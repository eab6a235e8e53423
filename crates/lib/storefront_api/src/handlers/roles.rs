//! Role administration and permission introspection handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use storefront_core::models::rbac::{NewRole, Role, RoleAssignment};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ApiJson;
use crate::middleware::auth::AuthContext;
use crate::middleware::meta::RequestMeta;
use crate::models::{AssignRoleRequest, MessageResponse, PermissionsResponse};
use crate::services::roles;

/// `GET /api/me/permissions`
pub async fn my_permissions_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthContext>,
) -> AppResult<Json<PermissionsResponse>> {
    Ok(Json(roles::my_permissions(&state, &user).await?))
}

/// `POST /api/admin/roles`
pub async fn create_role_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthContext>,
    meta: RequestMeta,
    ApiJson(body): ApiJson<NewRole>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let role = roles::create_role(&state, &meta.audit_context(Some(&admin)), body).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// `GET /api/admin/roles`
pub async fn list_roles_handler(State(state): State<AppState>) -> AppResult<Json<Vec<Role>>> {
    Ok(Json(roles::list_roles(&state).await?))
}

/// `POST /api/admin/roles/assign`
pub async fn assign_role_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthContext>,
    meta: RequestMeta,
    ApiJson(body): ApiJson<AssignRoleRequest>,
) -> AppResult<Json<RoleAssignment>> {
    let assignment =
        roles::assign_role(&state, &meta.audit_context(Some(&admin)), &admin, body).await?;
    Ok(Json(assignment))
}

/// `GET /api/admin/users/{id}/roles`
pub async fn user_roles_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<RoleAssignment>>> {
    Ok(Json(roles::roles_of_user(&state, &user_id).await?))
}

/// `DELETE /api/admin/users/{id}/roles/{role_id}`
pub async fn revoke_role_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthContext>,
    meta: RequestMeta,
    Path((user_id, role_id)): Path<(String, String)>,
) -> AppResult<Json<MessageResponse>> {
    roles::revoke_role(&state, &meta.audit_context(Some(&admin)), &user_id, &role_id).await?;
    Ok(Json(MessageResponse::new("Rôle retiré")))
}

/// `POST /api/admin/roles/{id}/disable`
pub async fn disable_role_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthContext>,
    meta: RequestMeta,
    Path(role_id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    roles::disable_role(&state, &meta.audit_context(Some(&admin)), &role_id).await?;
    Ok(Json(MessageResponse::new("Rôle désactivé")))
}

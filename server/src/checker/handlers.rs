//! Permission check HTTP handlers.

use axum::extract::{Path, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::types::{resolve_scope_id, RequestContextBody};
use crate::api::{ApiError, AppState};
use crate::conditions::ConditionSet;

use super::{
    check_with_conditions, delete_expired_grants, get_all_user_permissions, grant_permission,
    has_permission, revoke_grant, GrantSource, UserPermission,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/check", post(check))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckRequest {
    pub user_id: Uuid,
    #[validate(length(min = 3, max = 128))]
    pub permission: String,
    pub scope: Option<String>,
    pub context: Option<RequestContextBody>,
    /// Extra one-off conditions evaluated on top of anything stored on the
    /// matching grants.
    pub conditions: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub granted: bool,
}

/// Decide whether a user holds a permission.
///
/// POST /api/permissions/check
#[tracing::instrument(skip(state, request), fields(user = %request.user_id, permission = %request.permission))]
pub async fn check(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    request.validate()?;

    let scope_id = resolve_scope_id(&state, request.scope.as_deref()).await?;
    let ctx = request.context.map(RequestContextBody::into_context);

    let granted = match &request.conditions {
        Some(extra) => {
            let Some(extra) = ConditionSet::from_value(extra) else {
                // Malformed ad hoc conditions fail closed.
                return Ok(Json(CheckResponse { granted: false }));
            };
            check_with_conditions(
                &state.db,
                &state.evaluator,
                request.user_id,
                &request.permission,
                scope_id,
                &extra,
                ctx.as_ref(),
            )
            .await?
        }
        None => {
            has_permission(
                &state.db,
                &state.evaluator,
                request.user_id,
                &request.permission,
                scope_id,
                ctx.as_ref(),
            )
            .await?
        }
    };

    Ok(Json(CheckResponse { granted }))
}

#[derive(Debug, Deserialize)]
pub struct ListPermissionsQuery {
    pub scope: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserPermissionsResponse {
    pub user_id: Uuid,
    pub scope: Option<String>,
    pub permissions: Vec<String>,
}

/// The full effective permission set for a user in a scope.
///
/// GET /api/users/{id}/permissions
#[tracing::instrument(skip(state))]
pub async fn list_user_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListPermissionsQuery>,
) -> Result<Json<UserPermissionsResponse>, ApiError> {
    let scope_id = resolve_scope_id(&state, query.scope.as_deref()).await?;

    let permissions =
        get_all_user_permissions(&state.db, &state.resolution_cache, user_id, scope_id)
            .await?
            .into_iter()
            .collect();

    Ok(Json(UserPermissionsResponse {
        user_id,
        scope: query.scope,
        permissions,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantRequest {
    #[validate(length(min = 3, max = 128))]
    pub permission: String,
    pub scope: Option<String>,
    pub conditions: Option<serde_json::Value>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub granted_by: Option<Uuid>,
}

/// Grant a permission directly to a user.
///
/// POST /api/users/{id}/permissions
#[tracing::instrument(skip(state, request))]
pub async fn grant(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<GrantRequest>,
) -> Result<(axum::http::StatusCode, Json<UserPermission>), ApiError> {
    request.validate()?;

    let slug = crate::catalog::PermissionSlug::parse(&request.permission)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let scope_id = resolve_scope_id(&state, request.scope.as_deref()).await?;

    if let Some(conditions) = &request.conditions {
        if ConditionSet::from_value(conditions).is_none() {
            return Err(ApiError::BadRequest(
                "conditions must be an object keyed by condition type".to_string(),
            ));
        }
    }

    let grant = grant_permission(
        &state.db,
        &state.resolution_cache,
        user_id,
        &slug,
        scope_id,
        GrantSource::Direct,
        request.conditions,
        request.expires_at,
        request.granted_by,
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(grant)))
}

#[derive(Debug, Deserialize)]
pub struct RevokeGrantRequest {
    pub permission: String,
    pub scope: Option<String>,
    pub revoked_by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RevokeGrantResponse {
    pub revoked: bool,
}

/// Remove a direct grant.
///
/// DELETE /api/users/{id}/permissions
#[tracing::instrument(skip(state, request))]
pub async fn revoke(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<RevokeGrantRequest>,
) -> Result<Json<RevokeGrantResponse>, ApiError> {
    let scope_id = resolve_scope_id(&state, request.scope.as_deref()).await?;

    let revoked = revoke_grant(
        &state.db,
        &state.resolution_cache,
        user_id,
        &request.permission,
        scope_id,
        request.revoked_by,
    )
    .await?;

    Ok(Json(RevokeGrantResponse { revoked }))
}

#[derive(Debug, Serialize)]
pub struct GrantSweepResponse {
    pub removed: u64,
}

/// Remove user grants whose expiry has lapsed.
///
/// POST /api/maintenance/grants/expire-sweep
#[tracing::instrument(skip(state))]
pub async fn expired_grant_sweep(
    State(state): State<AppState>,
) -> Result<Json<GrantSweepResponse>, ApiError> {
    let removed = delete_expired_grants(&state.db, &state.resolution_cache).await?;
    Ok(Json(GrantSweepResponse { removed }))
}

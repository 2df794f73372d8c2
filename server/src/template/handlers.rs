//! Template version-control HTTP handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::types::resolve_scope_id;
use crate::api::AppState;

use super::versions::{self, VersionDiff};
use super::{queries, PermissionTemplate, PermissionTemplateVersion, TemplateError};

pub fn router() -> Router<AppState> {
    use axum::routing::{delete, patch};

    Router::new()
        .route("/", post(create_template))
        .route("/{id}", delete(delete_template))
        .route("/{id}/parent", patch(set_parent))
        .route(
            "/{id}/permissions/{permission_id}",
            post(attach_permission).delete(detach_permission),
        )
        .route(
            "/{id}/wildcards/{wildcard_id}",
            post(attach_wildcard).delete(detach_wildcard),
        )
        .route("/{id}/assignments", post(assign).delete(unassign))
        .route("/{id}/sync", post(sync))
        .route("/{id}/versions", post(create_version))
        .route("/{id}/rollback", post(rollback))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 100))]
    pub slug: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub auto_sync_users: bool,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

/// Create a template under an optional parent.
///
/// POST /api/templates
#[tracing::instrument(skip(state, request))]
pub async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<PermissionTemplate>), TemplateError> {
    request
        .validate()
        .map_err(|e| TemplateError::Validation(e.to_string()))?;

    let template = queries::create_template(
        &state.db,
        &request.slug,
        &request.name,
        request.parent_id,
        request.is_system,
        request.auto_sync_users,
        request.description.as_deref(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(template)))
}

#[derive(Debug, Serialize)]
pub struct DeleteTemplateResponse {
    pub nodes_removed: u64,
}

/// Delete a template and its entire descendant subtree. Children are removed,
/// not re-parented.
///
/// DELETE /api/templates/{id}
#[tracing::instrument(skip(state))]
pub async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<DeleteTemplateResponse>, TemplateError> {
    let nodes_removed = queries::delete_template(
        &state.db,
        &state.resolution_cache,
        template_id,
        None,
        None,
    )
    .await?;

    Ok(Json(DeleteTemplateResponse { nodes_removed }))
}

#[derive(Debug, Deserialize)]
pub struct SetParentRequest {
    pub parent_id: Option<Uuid>,
}

/// Re-parent a template and recompute the affected closure chains.
///
/// PATCH /api/templates/{id}/parent
#[tracing::instrument(skip(state, request))]
pub async fn set_parent(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(request): Json<SetParentRequest>,
) -> Result<Json<PermissionTemplate>, TemplateError> {
    crate::hierarchy::queries::set_parent(
        &state.db,
        crate::hierarchy::HierarchyFamily::Template,
        template_id,
        request.parent_id,
    )
    .await?;

    state.resolution_cache.clear();

    queries::find_template(&state.db, template_id)
        .await?
        .map(Json)
        .ok_or(TemplateError::NotFound)
}

#[derive(Debug, Default, Deserialize)]
pub struct AttachPermissionRequest {
    #[serde(default)]
    pub source: Option<String>,
    pub wildcard_id: Option<Uuid>,
}

/// Attach a permission to a template.
///
/// POST /api/templates/{id}/permissions/{permission_id}
#[tracing::instrument(skip(state, request))]
pub async fn attach_permission(
    State(state): State<AppState>,
    Path((template_id, permission_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<AttachPermissionRequest>,
) -> Result<StatusCode, TemplateError> {
    queries::attach_permission(
        &state.db,
        &state.resolution_cache,
        template_id,
        permission_id,
        request.source.as_deref().unwrap_or("direct"),
        request.wildcard_id,
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Detach a permission from a template.
///
/// DELETE /api/templates/{id}/permissions/{permission_id}
#[tracing::instrument(skip(state))]
pub async fn detach_permission(
    State(state): State<AppState>,
    Path((template_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, TemplateError> {
    let detached = queries::detach_permission(
        &state.db,
        &state.resolution_cache,
        template_id,
        permission_id,
    )
    .await?;

    Ok(if detached {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct AttachWildcardRequest {
    #[serde(default)]
    pub sort_order: i32,
}

/// Attach a wildcard to a template.
///
/// POST /api/templates/{id}/wildcards/{wildcard_id}
#[tracing::instrument(skip(state, request))]
pub async fn attach_wildcard(
    State(state): State<AppState>,
    Path((template_id, wildcard_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<AttachWildcardRequest>,
) -> Result<StatusCode, TemplateError> {
    queries::attach_wildcard(
        &state.db,
        &state.resolution_cache,
        template_id,
        wildcard_id,
        request.sort_order,
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Detach a wildcard from a template.
///
/// DELETE /api/templates/{id}/wildcards/{wildcard_id}
#[tracing::instrument(skip(state))]
pub async fn detach_wildcard(
    State(state): State<AppState>,
    Path((template_id, wildcard_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, TemplateError> {
    let detached = queries::detach_wildcard(
        &state.db,
        &state.resolution_cache,
        template_id,
        wildcard_id,
    )
    .await?;

    Ok(if detached {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub user_id: Uuid,
    pub scope: Option<String>,
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,
    pub pinned_version_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
}

const fn default_auto_sync() -> bool {
    true
}

/// Assign a template to a user.
///
/// POST /api/templates/{id}/assignments
#[tracing::instrument(skip(state, request))]
pub async fn assign(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(request): Json<AssignRequest>,
) -> Result<(StatusCode, Json<super::TemplateAssignment>), TemplateError> {
    let scope_id = resolve_scope_id(&state, request.scope.as_deref()).await?;

    let assignment = queries::assign_to_user(
        &state.db,
        &state.resolution_cache,
        request.user_id,
        template_id,
        scope_id,
        request.auto_sync,
        request.pinned_version_id,
        request.assigned_by,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(assignment)))
}

#[derive(Debug, Deserialize)]
pub struct UnassignRequest {
    pub user_id: Uuid,
    pub scope: Option<String>,
    pub removed_by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnassignResponse {
    pub removed: bool,
}

/// Remove a template assignment and the grants it synced.
///
/// DELETE /api/templates/{id}/assignments
#[tracing::instrument(skip(state, request))]
pub async fn unassign(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(request): Json<UnassignRequest>,
) -> Result<Json<UnassignResponse>, TemplateError> {
    let scope_id = resolve_scope_id(&state, request.scope.as_deref()).await?;

    let removed = queries::remove_assignment(
        &state.db,
        &state.resolution_cache,
        request.user_id,
        template_id,
        scope_id,
        request.removed_by,
    )
    .await?;

    Ok(Json(UnassignResponse { removed }))
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub grants: u64,
}

/// Push the template's permission set to all auto-sync assignees.
///
/// POST /api/templates/{id}/sync
#[tracing::instrument(skip(state))]
pub async fn sync(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<SyncResponse>, TemplateError> {
    let grants =
        queries::sync_assignments(&state.db, &state.resolution_cache, template_id).await?;
    Ok(Json(SyncResponse { grants }))
}

pub fn versions_router() -> Router<AppState> {
    use axum::routing::get;

    Router::new()
        .route("/{id}/publish", post(publish))
        .route("/{id}/restore", post(restore))
        .route("/compare", get(compare))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateVersionRequest {
    pub author_id: Option<Uuid>,
    #[validate(length(max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub changelog: Option<String>,
}

/// Snapshot a template's current membership into a new version.
///
/// POST /api/templates/{id}/versions
#[tracing::instrument(skip(state, request))]
pub async fn create_version(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(request): Json<CreateVersionRequest>,
) -> Result<(StatusCode, Json<PermissionTemplateVersion>), TemplateError> {
    request
        .validate()
        .map_err(|e| TemplateError::Validation(e.to_string()))?;

    let version = versions::create_version(
        &state.db,
        template_id,
        request.author_id,
        request.name.as_deref(),
        request.changelog.as_deref(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(version)))
}

#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    pub author_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub published: bool,
}

/// Publish a version. Publishing an already-published version reports
/// `published: false`.
///
/// POST /api/template-versions/{id}/publish
#[tracing::instrument(skip(state, request))]
pub async fn publish(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, TemplateError> {
    let published = versions::publish_version(&state.db, version_id, request.author_id).await?;
    Ok(Json(PublishResponse { published }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RestoreRequest {
    pub actor_id: Option<Uuid>,
}

/// Overwrite the live template from a snapshot.
///
/// POST /api/template-versions/{id}/restore
#[tracing::instrument(skip(state, request))]
pub async fn restore(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
    Json(request): Json<RestoreRequest>,
) -> Result<Json<PermissionTemplate>, TemplateError> {
    let template = versions::restore_version(
        &state.db,
        &state.resolution_cache,
        version_id,
        request.actor_id,
    )
    .await?;

    Ok(Json(template))
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub steps: i32,
    pub actor_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    pub restored: Option<PermissionTemplateVersion>,
}

/// Roll a template back a number of versions; `restored: null` when the
/// target version does not exist.
///
/// POST /api/templates/{id}/rollback
#[tracing::instrument(skip(state, request))]
pub async fn rollback(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<RollbackResponse>, TemplateError> {
    let restored = versions::rollback_template(
        &state.db,
        &state.resolution_cache,
        template_id,
        request.steps.max(0),
        request.actor_id,
    )
    .await?;

    Ok(Json(RollbackResponse { restored }))
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub v1: Uuid,
    pub v2: Uuid,
}

/// Diff two versions' permission sets.
///
/// GET /api/template-versions/compare
#[tracing::instrument(skip(state))]
pub async fn compare(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<VersionDiff>, TemplateError> {
    let diff = versions::compare_versions(&state.db, query.v1, query.v2).await?;
    Ok(Json(diff))
}

//! Permission catalog HTTP handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::AppState;

use super::{queries, CatalogError, Permission, PermissionSlug};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", delete(remove))
        .route("/{id}/rename", post(rename))
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, "permission_not_found"),
            Self::DuplicateSlug => (StatusCode::CONFLICT, "duplicate_slug"),
            Self::InvalidSlug(_) => (StatusCode::BAD_REQUEST, "invalid_slug"),
            Self::StillReferenced { .. } => (StatusCode::CONFLICT, "permission_referenced"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            Self::Database(e) => {
                tracing::error!(error = %e, "Catalog database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let message = match &self {
            Self::Database(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}

/// List catalog entries.
///
/// GET /api/permissions
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Permission>>, CatalogError> {
    Ok(Json(queries::list_permissions(&state.db).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    pub slug: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub group_id: Option<Uuid>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub actor_id: Option<Uuid>,
}

/// Create a catalog entry; covering auto-expand wildcards are refreshed.
///
/// POST /api/permissions
#[tracing::instrument(skip(state, request))]
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreatePermissionRequest>,
) -> Result<(StatusCode, Json<Permission>), CatalogError> {
    request
        .validate()
        .map_err(|e| CatalogError::Validation(e.to_string()))?;
    let slug = PermissionSlug::parse(&request.slug)?;

    let actor_name = match request.actor_id {
        Some(actor) => crate::directory::user_display_name(&state.db, actor).await?,
        None => None,
    };

    let permission = queries::create_permission(
        &state.db,
        &slug,
        &request.name,
        request.group_id,
        request.description.as_deref(),
        request.actor_id,
        actor_name.as_deref(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(permission)))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub slug: String,
    pub actor_id: Option<Uuid>,
}

/// Rename a permission slug; wildcards covering either slug are re-expanded.
///
/// POST /api/permissions/{id}/rename
#[tracing::instrument(skip(state, request))]
pub async fn rename(
    State(state): State<AppState>,
    Path(permission_id): Path<Uuid>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<Permission>, CatalogError> {
    let slug = PermissionSlug::parse(&request.slug)?;

    let actor_name = match request.actor_id {
        Some(actor) => crate::directory::user_display_name(&state.db, actor).await?,
        None => None,
    };

    let permission = queries::rename_permission_slug(
        &state.db,
        permission_id,
        &slug,
        request.actor_id,
        actor_name.as_deref(),
    )
    .await?;

    // Grants key on the slug string; anything cached may now be stale.
    state.resolution_cache.clear();

    Ok(Json(permission))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// Delete a catalog entry; refused while grants or templates reference it.
///
/// DELETE /api/permissions/{id}
#[tracing::instrument(skip(state))]
pub async fn remove(
    State(state): State<AppState>,
    Path(permission_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, CatalogError> {
    queries::delete_permission(&state.db, permission_id, None, None).await?;
    Ok(Json(DeleteResponse { deleted: true }))
}

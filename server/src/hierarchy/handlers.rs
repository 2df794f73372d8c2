//! Hierarchy maintenance HTTP handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::{ApiError, AppState};

use super::{queries, HierarchyFamily};

#[derive(Debug, Serialize)]
pub struct RebuildFamilyResponse {
    pub family: String,
    pub closure_rows: u64,
}

/// Recompute a whole family's closure table from its parent pointers.
///
/// POST /api/maintenance/hierarchy/{family}/rebuild
#[tracing::instrument(skip(state))]
pub async fn rebuild_family(
    State(state): State<AppState>,
    Path(family): Path<String>,
) -> Result<Json<RebuildFamilyResponse>, ApiError> {
    let Some(family) = HierarchyFamily::parse(&family) else {
        return Err(ApiError::BadRequest(format!(
            "Unknown hierarchy family: {family:?}"
        )));
    };

    let closure_rows = queries::rebuild(&state.db, family)
        .await
        .map_err(|e| match e {
            super::HierarchyError::Database(db) => ApiError::Database(db),
            other => ApiError::BadRequest(other.to_string()),
        })?;

    // Levels may have shifted; cached resolutions are no longer trustworthy.
    state.resolution_cache.clear();

    Ok(Json(RebuildFamilyResponse {
        family: family.as_str().to_string(),
        closure_rows,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100))]
    pub slug: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateGroupResponse {
    pub id: Uuid,
}

/// Create a group node in the user-group or permission-group family.
///
/// POST /api/groups/{family}
#[tracing::instrument(skip(state, request))]
pub async fn create_group(
    State(state): State<AppState>,
    Path(family): Path<String>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<CreateGroupResponse>), ApiError> {
    request.validate()?;

    let family = match HierarchyFamily::parse(&family) {
        Some(HierarchyFamily::Template) | None => {
            return Err(ApiError::BadRequest(format!(
                "Unknown group family: {family:?}"
            )));
        }
        Some(found) => found,
    };

    let id = queries::create_group_node(
        &state.db,
        family,
        &request.slug,
        &request.name,
        request.parent_id,
    )
    .await
    .map_err(|e| match e {
        super::HierarchyError::Database(db) => ApiError::Database(db),
        other => ApiError::BadRequest(other.to_string()),
    })?;

    Ok((StatusCode::CREATED, Json(CreateGroupResponse { id })))
}

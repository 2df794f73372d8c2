//! Wildcard maintenance HTTP handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;

use super::{queries, PermissionWildcard, WildcardError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/{id}/rebuild", post(rebuild))
}

#[derive(Debug, Deserialize)]
pub struct CreateWildcardRequest {
    pub pattern: String,
    #[serde(default = "default_auto_expand")]
    pub auto_expand: bool,
}

const fn default_auto_expand() -> bool {
    true
}

/// Register a wildcard and build its initial expansion.
///
/// POST /api/wildcards
#[tracing::instrument(skip(state, request))]
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateWildcardRequest>,
) -> Result<(StatusCode, Json<PermissionWildcard>), WildcardError> {
    let wildcard = queries::create_wildcard(&state.db, &request.pattern, request.auto_expand).await?;
    queries::rebuild_expansions(&state.db, wildcard.id).await?;

    let wildcard = queries::find_wildcard(&state.db, wildcard.id)
        .await?
        .ok_or(WildcardError::NotFound)?;

    Ok((StatusCode::CREATED, Json(wildcard)))
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub wildcard_id: Uuid,
    pub permissions_count: i64,
}

/// Rebuild one wildcard's cached expansion.
///
/// POST /api/wildcards/{id}/rebuild
#[tracing::instrument(skip(state))]
pub async fn rebuild(
    State(state): State<AppState>,
    Path(wildcard_id): Path<Uuid>,
) -> Result<Json<RebuildResponse>, WildcardError> {
    let permissions_count = queries::rebuild_expansions(&state.db, wildcard_id).await?;
    Ok(Json(RebuildResponse {
        wildcard_id,
        permissions_count,
    }))
}

#[derive(Debug, Serialize)]
pub struct AutoExpandResponse {
    pub rebuilt: Vec<RebuildResponse>,
}

/// Rebuild every active auto-expanding wildcard.
///
/// POST /api/maintenance/wildcards/auto-expand
#[tracing::instrument(skip(state))]
pub async fn auto_expand(
    State(state): State<AppState>,
) -> Result<Json<AutoExpandResponse>, WildcardError> {
    let rebuilt = queries::auto_expand_all(&state.db)
        .await?
        .into_iter()
        .map(|(wildcard_id, permissions_count)| RebuildResponse {
            wildcard_id,
            permissions_count,
        })
        .collect();

    Ok(Json(AutoExpandResponse { rebuilt }))
}

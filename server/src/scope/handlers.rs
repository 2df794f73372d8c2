//! Scope HTTP handlers.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiError, AppState};

use super::types::{EntityKind, EntityRef, Scope};
use super::queries;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/resolve", post(resolve))
        .route("/{id}/deactivate", post(deactivate))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub entity_type: String,
    pub entity_id: Uuid,
}

/// Resolve (or create) the canonical scope for an entity.
///
/// POST /api/scopes/resolve
#[tracing::instrument(skip(state))]
pub async fn resolve(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<Scope>, ApiError> {
    let Some(kind) = EntityKind::parse(&request.entity_type) else {
        return Err(ApiError::BadRequest(format!(
            "Unknown entity type: {:?}",
            request.entity_type
        )));
    };

    let scope = queries::resolve(
        &state.db,
        &state.scope_cache,
        EntityRef::new(kind, request.entity_id),
    )
    .await?;

    Ok(Json(scope))
}

#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    pub deactivated: bool,
}

/// Deactivate a scope and purge its cache entries. History referencing the
/// scope is kept.
///
/// POST /api/scopes/{id}/deactivate
#[tracing::instrument(skip(state))]
pub async fn deactivate(
    State(state): State<AppState>,
    Path(scope_id): Path<Uuid>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    let deactivated = queries::deactivate(&state.db, &state.scope_cache, scope_id).await?;
    Ok(Json(DeactivateResponse { deactivated }))
}

//! Delegation HTTP handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::types::resolve_scope_id;
use crate::api::AppState;

use super::delegator::{self, DelegationRequest};
use super::queries::{self, DelegationDirection};
use super::{DelegationError, PermissionDelegation};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_delegation))
        .route("/{id}/revoke", post(revoke_delegation))
        .route("/{id}/extend", post(extend_delegation))
}

const DEFAULT_MAX_REDELEGATION_DEPTH: i32 = 3;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDelegationRequest {
    pub delegator_id: Uuid,
    pub delegatee_id: Uuid,
    #[validate(length(min = 3, max = 128))]
    pub permission: String,
    pub scope: Option<String>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub can_redelegate: bool,
    pub max_redelegation_depth: Option<i32>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Create a delegation.
///
/// POST /api/delegations
#[tracing::instrument(skip(state, request))]
pub async fn create_delegation(
    State(state): State<AppState>,
    Json(request): Json<CreateDelegationRequest>,
) -> Result<(StatusCode, Json<PermissionDelegation>), DelegationError> {
    request
        .validate()
        .map_err(|e| DelegationError::Validation(e.to_string()))?;

    let scope_id = resolve_scope_id(&state, request.scope.as_deref()).await?;

    let delegation = delegator::delegate(
        &state.db,
        &state.resolution_cache,
        &state.evaluator,
        state.notifier.as_ref(),
        DelegationRequest {
            delegator_id: request.delegator_id,
            delegatee_id: request.delegatee_id,
            permission_slug: request.permission,
            scope_id,
            valid_until: request.valid_until,
            can_redelegate: request.can_redelegate,
            max_redelegation_depth: request
                .max_redelegation_depth
                .unwrap_or(DEFAULT_MAX_REDELEGATION_DEPTH)
                .max(0),
            reason: request.reason,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(delegation)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RevokeDelegationRequest {
    pub revoked_by: Uuid,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevokeDelegationResponse {
    pub revoked: bool,
}

/// Revoke a delegation. A second revoke reports `revoked: false`.
///
/// POST /api/delegations/{id}/revoke
#[tracing::instrument(skip(state, request))]
pub async fn revoke_delegation(
    State(state): State<AppState>,
    Path(delegation_id): Path<Uuid>,
    Json(request): Json<RevokeDelegationRequest>,
) -> Result<Json<RevokeDelegationResponse>, DelegationError> {
    let revoked = delegator::revoke(
        &state.db,
        &state.resolution_cache,
        state.notifier.as_ref(),
        delegation_id,
        request.revoked_by,
        request.reason.as_deref(),
    )
    .await?;

    Ok(Json(RevokeDelegationResponse { revoked }))
}

#[derive(Debug, Deserialize)]
pub struct ExtendDelegationRequest {
    pub extended_by: Uuid,
    pub valid_until: DateTime<Utc>,
}

/// Extend a delegation's validity window (forward only).
///
/// POST /api/delegations/{id}/extend
#[tracing::instrument(skip(state, request))]
pub async fn extend_delegation(
    State(state): State<AppState>,
    Path(delegation_id): Path<Uuid>,
    Json(request): Json<ExtendDelegationRequest>,
) -> Result<Json<PermissionDelegation>, DelegationError> {
    let extended = delegator::extend_delegation(
        &state.db,
        delegation_id,
        request.valid_until,
        request.extended_by,
    )
    .await?;

    Ok(Json(extended))
}

#[derive(Debug, Deserialize)]
pub struct ListDelegationsQuery {
    /// `given` or `received` (default).
    pub direction: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

/// Delegations a user has given or received.
///
/// GET /api/users/{id}/delegations
#[tracing::instrument(skip(state))]
pub async fn list_user_delegations(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListDelegationsQuery>,
) -> Result<Json<Vec<PermissionDelegation>>, DelegationError> {
    let direction = query
        .direction
        .as_deref()
        .and_then(DelegationDirection::parse)
        .unwrap_or(DelegationDirection::Received);

    let delegations =
        queries::get_user_delegations(&state.db, user_id, direction, query.active_only).await?;

    Ok(Json(delegations))
}

#[derive(Debug, Serialize)]
pub struct ExpireSweepResponse {
    pub lapsed: usize,
}

/// Report delegations whose validity window has lapsed.
///
/// POST /api/maintenance/delegations/expire-sweep
#[tracing::instrument(skip(state))]
pub async fn expire_sweep(
    State(state): State<AppState>,
) -> Result<Json<ExpireSweepResponse>, DelegationError> {
    let lapsed =
        delegator::expire_expired_delegations(&state.db, state.notifier.as_ref()).await?;

    Ok(Json(ExpireSweepResponse {
        lapsed: lapsed.len(),
    }))
}

//! Audit log HTTP handlers.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::api::types::Pagination;
use crate::api::{ApiError, AppState};

use super::{queries, AuditLogEntry};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Action prefix filter, e.g. `delegation.`.
    pub action: Option<String>,
}

/// Page through the audit log, newest first.
///
/// GET /api/audit
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, ApiError> {
    let page = Pagination {
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    }
    .clamped(state.config.audit_page_limit);
    let entries = queries::list_audit_log(
        &state.db,
        page.limit,
        page.offset,
        query.action.as_deref(),
    )
    .await?;

    Ok(Json(entries))
}

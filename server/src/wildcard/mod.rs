//! Wildcard expansion.
//!
//! A wildcard turns a pattern string into a concrete permission set. The
//! expansion is cached in a pivot table for listing and sync performance, but
//! the cache is a derived view: it can be rebuilt from the pattern alone at
//! any time, and must be rebuilt whenever the catalog changes under it.

pub mod handlers;
pub mod pattern;
pub mod queries;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub use pattern::{classify, macro_permissions, matches_pattern, PatternType};
pub use queries::{
    auto_expand_all, create_wildcard, expand, find_wildcard, rebuild_expansions,
    refresh_matching_expansions,
};

/// Persisted wildcard row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PermissionWildcard {
    pub id: Uuid,
    pub pattern: String,
    pub pattern_type: String,
    pub auto_expand: bool,
    pub is_active: bool,
    pub last_expanded_at: Option<DateTime<Utc>>,
    pub permissions_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wildcard maintenance errors.
#[derive(Debug, thiserror::Error)]
pub enum WildcardError {
    #[error("Wildcard not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for WildcardError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, "wildcard_not_found", self.to_string()),
            Self::Database(e) => {
                tracing::error!(error = %e, "Wildcard database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}

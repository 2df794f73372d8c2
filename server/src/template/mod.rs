//! Permission templates.
//!
//! A template is a hierarchical, versioned bundle of permissions assignable to
//! users: role-like, but wildcard-capable and closure-indexed. Assignments
//! resolve through the checker; auto-sync assignments additionally materialize
//! the template's permission set as `template`-sourced user grants.

pub mod handlers;
pub mod queries;
pub mod versions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::hierarchy::HierarchyError;

pub use queries::{
    assign_to_user, attach_permission, attach_wildcard, create_template, delete_template,
    detach_permission, detach_wildcard, find_template, remove_assignment, sync_assignments,
    template_all_slugs,
};
pub use versions::{
    compare_snapshots, compare_versions, create_version, find_version, publish_version,
    restore_version, rollback_template, VersionDiff,
};

/// Persisted template row. `level` is derived from the closure table and never
/// hand-set.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PermissionTemplate {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub level: i32,
    pub is_system: bool,
    pub auto_sync_users: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's template assignment, optionally scoped and optionally pinned to a
/// published version.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TemplateAssignment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub scope_id: Option<Uuid>,
    pub auto_sync: bool,
    pub pinned_version_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: DateTime<Utc>,
}

/// Immutable snapshot of a template's membership.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PermissionTemplateVersion {
    pub id: Uuid,
    pub template_id: Uuid,
    pub version: i32,
    pub name: Option<String>,
    pub template_name: String,
    pub changelog: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_by_name: Option<String>,
    pub permissions: serde_json::Value,
    pub wildcards: serde_json::Value,
    pub is_stable: bool,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

/// Template lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template not found")]
    NotFound,

    #[error("Template version not found")]
    VersionNotFound,

    #[error("System templates cannot be deleted")]
    SystemTemplate,

    #[error("Template subtree still has {0} assignment(s)")]
    HasAssignees(i64),

    #[error("Template slug already exists")]
    DuplicateSlug,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for TemplateError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, "template_not_found"),
            Self::VersionNotFound => (StatusCode::NOT_FOUND, "version_not_found"),
            Self::SystemTemplate => (StatusCode::FORBIDDEN, "system_template"),
            Self::HasAssignees(_) => (StatusCode::CONFLICT, "template_assigned"),
            Self::DuplicateSlug => (StatusCode::CONFLICT, "duplicate_slug"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            Self::Hierarchy(HierarchyError::CycleDetected(_)) => {
                (StatusCode::CONFLICT, "hierarchy_cycle")
            }
            Self::Hierarchy(HierarchyError::NodeNotFound) => {
                (StatusCode::NOT_FOUND, "template_not_found")
            }
            Self::Hierarchy(HierarchyError::Database(e)) | Self::Database(e) => {
                tracing::error!(error = %e, "Template database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let message = match &self {
            Self::Hierarchy(HierarchyError::Database(_)) | Self::Database(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}

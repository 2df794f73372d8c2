//! Permission catalog.
//!
//! Catalog rows carry display metadata for known permissions. Slug identity is
//! independent of the catalog: resolution matches on slug strings, and a catalog
//! row is looked up separately when metadata is needed.

pub mod handlers;
pub mod queries;
pub mod slug;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub use queries::{
    create_permission, delete_permission, find_permission_by_slug, list_permissions,
    rename_permission_slug,
};
pub use slug::{InvalidSlug, PermissionSlug};

/// Catalog entry for a permission.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Permission {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub group_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog mutation errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Permission not found")]
    NotFound,

    #[error("Permission slug already exists")]
    DuplicateSlug,

    #[error(transparent)]
    InvalidSlug(#[from] InvalidSlug),

    #[error("Permission is referenced by {grants} grant(s) and {templates} template(s)")]
    StillReferenced { grants: i64, templates: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

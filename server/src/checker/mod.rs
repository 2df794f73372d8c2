//! Effective permission resolution.
//!
//! A permission is effectively granted when any of three independent sources
//! grants it, checked in order with short-circuiting:
//!
//! 1. a direct grant (whose conditions, if any, must pass),
//! 2. an assigned template carrying the slug directly, through a wildcard, or
//!    through an ancestor template,
//! 3. an active, unrevoked delegation within its validity window.
//!
//! Slugs are matched as strings: a slug that never became a catalog entry can
//! still be granted and checked.

pub mod cache;
pub mod grants;
pub mod handlers;
pub mod queries;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub use cache::{ResolutionCache, DEFAULT_TTL};
pub use grants::{delete_expired_grants, grant_permission, revoke_grant};
pub use queries::{
    check_with_conditions, get_all_user_permissions, has_own_permission, has_permission,
    load_principal,
};

/// A direct user grant.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserPermission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub permission_slug: String,
    pub scope_id: Option<Uuid>,
    pub source: String,
    pub conditions: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a grant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Direct,
    Template,
    Wildcard,
    Delegation,
    Request,
}

impl GrantSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Template => "template",
            Self::Wildcard => "wildcard",
            Self::Delegation => "delegation",
            Self::Request => "request",
        }
    }
}

//! Time-bounded permission delegation.
//!
//! A delegation temporarily grants one permission from one user to another.
//! Every delegation carries a mandatory validity window (there are no
//! permanent delegations) and revocation is one-way. Re-delegation builds a
//! chain whose depth is bounded by the root delegation's limit.

pub mod chain;
pub mod delegator;
pub mod handlers;
pub mod queries;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub use chain::{chain_path_ids, extend_chain, ChainLink};
pub use delegator::{
    delegate, expire_expired_delegations, extend_delegation, revoke, validate_extension,
    DelegationRequest,
};
pub use queries::{find_delegation, get_user_delegations, DelegationDirection};

/// Persisted delegation row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PermissionDelegation {
    pub id: Uuid,
    pub delegator_id: Uuid,
    pub delegatee_id: Uuid,
    pub permission_slug: String,
    pub scope_id: Option<Uuid>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub can_redelegate: bool,
    pub max_redelegation_depth: i32,
    pub reason: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
    pub revoke_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PermissionDelegation {
    /// Active means unrevoked and inside the validity window. Expiry is a
    /// predicate, never a stored state transition.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.valid_from <= now && self.valid_until > now
    }
}

/// Chain row linking a re-delegation to its parent. Original delegations
/// (depth 0) have no chain row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DelegationChain {
    pub id: Uuid,
    pub delegation_id: Uuid,
    pub parent_delegation_id: Uuid,
    pub root_delegation_id: Uuid,
    pub depth: i32,
    pub chain_path: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl DelegationChain {
    /// Ordered delegation ids from the root to this link.
    #[must_use]
    pub fn path(&self) -> Vec<Uuid> {
        chain_path_ids(&self.chain_path)
    }
}

/// Delegation lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("Delegation not found")]
    NotFound,

    #[error("Delegator does not hold the permission")]
    NotEligible,

    #[error("Expiration must be in the future")]
    ExpiryInPast,

    #[error("Expiration can only move forward")]
    ExpiryNotMonotonic,

    #[error("Delegation has been revoked")]
    AlreadyRevoked,

    #[error("Source delegation does not allow re-delegation")]
    RedelegationNotAllowed,

    #[error("Re-delegation depth {requested} exceeds the chain limit of {max}")]
    MaxDepthExceeded { max: i32, requested: i32 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for DelegationError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, "delegation_not_found"),
            Self::NotEligible => (StatusCode::FORBIDDEN, "not_eligible"),
            Self::ExpiryInPast => (StatusCode::BAD_REQUEST, "expiry_in_past"),
            Self::ExpiryNotMonotonic => (StatusCode::BAD_REQUEST, "expiry_not_monotonic"),
            Self::AlreadyRevoked => (StatusCode::CONFLICT, "already_revoked"),
            Self::RedelegationNotAllowed => (StatusCode::FORBIDDEN, "redelegation_not_allowed"),
            Self::MaxDepthExceeded { .. } => (StatusCode::FORBIDDEN, "max_depth_exceeded"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            Self::Database(e) => {
                tracing::error!(error = %e, "Delegation database error");
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn delegation(valid_until: DateTime<Utc>) -> PermissionDelegation {
        let now = Utc::now();
        PermissionDelegation {
            id: Uuid::new_v4(),
            delegator_id: Uuid::new_v4(),
            delegatee_id: Uuid::new_v4(),
            permission_slug: "orders.approve".to_string(),
            scope_id: None,
            valid_from: now - Duration::hours(1),
            valid_until,
            can_redelegate: false,
            max_redelegation_depth: 1,
            reason: None,
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
            created_at: now,
        }
    }

    #[test]
    fn test_is_active_inside_window() {
        let d = delegation(Utc::now() + Duration::hours(1));
        assert!(d.is_active(Utc::now()));
    }

    #[test]
    fn test_lapsed_window_is_inactive() {
        let d = delegation(Utc::now() - Duration::minutes(1));
        assert!(!d.is_active(Utc::now()));
    }

    #[test]
    fn test_not_yet_valid_is_inactive() {
        let mut d = delegation(Utc::now() + Duration::hours(2));
        d.valid_from = Utc::now() + Duration::hours(1);
        assert!(!d.is_active(Utc::now()));
    }

    #[test]
    fn test_revocation_is_terminal() {
        let mut d = delegation(Utc::now() + Duration::hours(1));
        d.revoked_at = Some(Utc::now());
        assert!(!d.is_active(Utc::now()));
        // still inactive even far inside the validity window
        assert!(!d.is_active(d.valid_from + Duration::minutes(1)));
    }
}

//! Database queries for delegations.

use sqlx::PgPool;
use uuid::Uuid;

use super::{DelegationChain, PermissionDelegation};

pub(crate) const DELEGATION_COLUMNS: &str = "id, delegator_id, delegatee_id, permission_slug, scope_id, valid_from, valid_until, can_redelegate, max_redelegation_depth, reason, revoked_at, revoked_by, revoke_reason, created_at";

const CHAIN_COLUMNS: &str =
    "id, delegation_id, parent_delegation_id, root_delegation_id, depth, chain_path, created_at";

/// Which side of the delegation the user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationDirection {
    Given,
    Received,
}

impl DelegationDirection {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "given" => Some(Self::Given),
            "received" => Some(Self::Received),
            _ => None,
        }
    }
}

/// Fetch a delegation by id.
pub async fn find_delegation(
    pool: &PgPool,
    delegation_id: Uuid,
) -> sqlx::Result<Option<PermissionDelegation>> {
    sqlx::query_as::<_, PermissionDelegation>(&format!(
        r"
        SELECT {DELEGATION_COLUMNS}
        FROM permission_delegations
        WHERE id = $1
        "
    ))
    .bind(delegation_id)
    .fetch_optional(pool)
    .await
}

/// Fetch the chain row for a delegation, if it is a re-delegation.
pub async fn find_chain(
    pool: &PgPool,
    delegation_id: Uuid,
) -> sqlx::Result<Option<DelegationChain>> {
    sqlx::query_as::<_, DelegationChain>(&format!(
        r"
        SELECT {CHAIN_COLUMNS}
        FROM delegation_chains
        WHERE delegation_id = $1
        "
    ))
    .bind(delegation_id)
    .fetch_optional(pool)
    .await
}

/// Active delegations held by `user` for `slug` in `scope`: the candidates a
/// re-delegation can chain from.
pub async fn active_received_delegations(
    pool: &PgPool,
    user_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
) -> sqlx::Result<Vec<PermissionDelegation>> {
    sqlx::query_as::<_, PermissionDelegation>(&format!(
        r"
        SELECT {DELEGATION_COLUMNS}
        FROM permission_delegations
        WHERE delegatee_id = $1
          AND permission_slug = $2
          AND (scope_id IS NULL OR scope_id = $3)
          AND revoked_at IS NULL
          AND valid_from <= NOW()
          AND valid_until > NOW()
        ORDER BY valid_until DESC
        "
    ))
    .bind(user_id)
    .bind(slug)
    .bind(scope_id)
    .fetch_all(pool)
    .await
}

/// Delegations a user has given or received, newest first.
pub async fn get_user_delegations(
    pool: &PgPool,
    user_id: Uuid,
    direction: DelegationDirection,
    active_only: bool,
) -> sqlx::Result<Vec<PermissionDelegation>> {
    let side = match direction {
        DelegationDirection::Given => "delegator_id",
        DelegationDirection::Received => "delegatee_id",
    };
    let activity = if active_only {
        "AND revoked_at IS NULL AND valid_from <= NOW() AND valid_until > NOW()"
    } else {
        ""
    };

    sqlx::query_as::<_, PermissionDelegation>(&format!(
        r"
        SELECT {DELEGATION_COLUMNS}
        FROM permission_delegations
        WHERE {side} = $1
        {activity}
        ORDER BY created_at DESC
        "
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Unrevoked delegations whose validity window has lapsed.
pub async fn lapsed_delegations(pool: &PgPool) -> sqlx::Result<Vec<PermissionDelegation>> {
    sqlx::query_as::<_, PermissionDelegation>(&format!(
        r"
        SELECT {DELEGATION_COLUMNS}
        FROM permission_delegations
        WHERE revoked_at IS NULL
          AND valid_until <= NOW()
        ORDER BY valid_until ASC
        "
    ))
    .fetch_all(pool)
    .await
}

//! Delegation lifecycle orchestration.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditEvent};
use crate::checker::{self, ResolutionCache};
use crate::conditions::ConditionEvaluator;
use crate::directory;
use crate::notify::Notifier;

use super::chain::{chain_path_value, extend_chain, ChainLink};
use super::queries::{self, DELEGATION_COLUMNS};
use super::{DelegationError, PermissionDelegation};

/// Parameters for a new delegation.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub delegator_id: Uuid,
    pub delegatee_id: Uuid,
    pub permission_slug: String,
    pub scope_id: Option<Uuid>,
    pub valid_until: DateTime<Utc>,
    pub can_redelegate: bool,
    pub max_redelegation_depth: i32,
    pub reason: Option<String>,
}

/// Create a delegation.
///
/// Preconditions are checked before any write: the delegator must currently
/// hold the permission (scope-aware) and the expiration must be strictly in
/// the future. When the delegator holds the permission only through a
/// delegation, this is a re-delegation: the source delegation must allow it
/// and the new chain depth must stay within the root delegation's limit.
///
/// The eligibility check and the insert are not serialized against concurrent
/// revocation; delegations are human-paced, and the narrow race is accepted.
#[tracing::instrument(skip(pool, cache, evaluator, notifier, request), fields(delegator = %request.delegator_id, delegatee = %request.delegatee_id, slug = %request.permission_slug))]
pub async fn delegate(
    pool: &PgPool,
    cache: &ResolutionCache,
    evaluator: &ConditionEvaluator,
    notifier: &dyn Notifier,
    request: DelegationRequest,
) -> Result<PermissionDelegation, DelegationError> {
    let now = Utc::now();
    if request.valid_until <= now {
        return Err(DelegationError::ExpiryInPast);
    }

    if !checker::has_permission(
        pool,
        evaluator,
        request.delegator_id,
        &request.permission_slug,
        request.scope_id,
        None,
    )
    .await?
    {
        return Err(DelegationError::NotEligible);
    }

    // A delegator holding the permission in their own right starts a fresh
    // chain; one holding it only by delegation must chain from that source.
    let parent = if checker::has_own_permission(
        pool,
        evaluator,
        request.delegator_id,
        &request.permission_slug,
        request.scope_id,
        None,
    )
    .await?
    {
        None
    } else {
        Some(
            eligible_source(
                pool,
                request.delegator_id,
                &request.permission_slug,
                request.scope_id,
            )
            .await?,
        )
    };

    let mut tx = pool.begin().await?;

    let delegation = sqlx::query_as::<_, PermissionDelegation>(&format!(
        r"
        INSERT INTO permission_delegations
            (delegator_id, delegatee_id, permission_slug, scope_id,
             valid_from, valid_until, can_redelegate, max_redelegation_depth, reason)
        VALUES ($1, $2, $3, $4, NOW(), $5, $6, $7, $8)
        RETURNING {DELEGATION_COLUMNS}
        "
    ))
    .bind(request.delegator_id)
    .bind(request.delegatee_id)
    .bind(&request.permission_slug)
    .bind(request.scope_id)
    .bind(request.valid_until)
    .bind(request.can_redelegate)
    .bind(request.max_redelegation_depth)
    .bind(&request.reason)
    .fetch_one(&mut *tx)
    .await?;

    let chain_depth = if let Some((parent_id, mut link)) = parent {
        // The placeholder id becomes the real one once the insert ran.
        link.path.pop();
        link.path.push(delegation.id);

        sqlx::query(
            r"
            INSERT INTO delegation_chains
                (delegation_id, parent_delegation_id, root_delegation_id, depth, chain_path)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(delegation.id)
        .bind(parent_id)
        .bind(link.root_delegation_id)
        .bind(link.depth)
        .bind(chain_path_value(&link.path))
        .execute(&mut *tx)
        .await?;

        link.depth
    } else {
        0
    };

    tx.commit().await?;

    cache.invalidate_user(request.delegatee_id);

    let delegator_name = directory::user_display_name(pool, request.delegator_id).await?;
    let delegatee_name = directory::user_display_name(pool, request.delegatee_id).await?;
    audit::record(
        pool,
        AuditEvent::new("delegation.created")
            .actor(Some(request.delegator_id), delegator_name.as_deref())
            .subject("user", Some(request.delegatee_id), delegatee_name.as_deref())
            .source("delegation", Some(delegation.id))
            .metadata(serde_json::json!({
                "slug": delegation.permission_slug,
                "scope_id": delegation.scope_id,
                "valid_until": delegation.valid_until,
                "can_redelegate": delegation.can_redelegate,
                "chain_depth": chain_depth,
                "reason": delegation.reason,
            })),
    )
    .await;

    notifier.delegation_created(&delegation);
    Ok(delegation)
}

/// Find the delegation a re-delegation can chain from, enforcing the
/// `can_redelegate` flag and the root's depth limit.
async fn eligible_source(
    pool: &PgPool,
    delegator_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
) -> Result<(Uuid, ChainLink), DelegationError> {
    let candidates =
        queries::active_received_delegations(pool, delegator_id, slug, scope_id).await?;
    if candidates.is_empty() {
        // has_permission said yes but the row has gone: the accepted race.
        return Err(DelegationError::NotEligible);
    }

    let mut depth_rejection: Option<DelegationError> = None;

    for candidate in &candidates {
        if !candidate.can_redelegate {
            continue;
        }

        let parent_chain = queries::find_chain(pool, candidate.id).await?;
        // The path ends in a placeholder replaced after the insert.
        let link = extend_chain(parent_chain.as_ref(), candidate.id, Uuid::nil());

        let root_max = match &parent_chain {
            Some(chain) => {
                queries::find_delegation(pool, chain.root_delegation_id)
                    .await?
                    .map_or(candidate.max_redelegation_depth, |root| {
                        root.max_redelegation_depth
                    })
            }
            None => candidate.max_redelegation_depth,
        };

        if link.depth > root_max {
            depth_rejection.get_or_insert(DelegationError::MaxDepthExceeded {
                max: root_max,
                requested: link.depth,
            });
            continue;
        }

        return Ok((candidate.id, link));
    }

    Err(depth_rejection.unwrap_or(DelegationError::RedelegationNotAllowed))
}

/// Revoke a delegation. Irreversible; returns `false` if already revoked.
#[tracing::instrument(skip(pool, cache, notifier))]
pub async fn revoke(
    pool: &PgPool,
    cache: &ResolutionCache,
    notifier: &dyn Notifier,
    delegation_id: Uuid,
    revoked_by: Uuid,
    reason: Option<&str>,
) -> Result<bool, DelegationError> {
    let Some(existing) = queries::find_delegation(pool, delegation_id).await? else {
        return Err(DelegationError::NotFound);
    };
    if existing.revoked_at.is_some() {
        return Ok(false);
    }

    let revoked = sqlx::query_as::<_, PermissionDelegation>(&format!(
        r"
        UPDATE permission_delegations
        SET revoked_at = NOW(), revoked_by = $2, revoke_reason = $3
        WHERE id = $1
          AND revoked_at IS NULL
        RETURNING {DELEGATION_COLUMNS}
        "
    ))
    .bind(delegation_id)
    .bind(revoked_by)
    .bind(reason)
    .fetch_optional(pool)
    .await?;

    // A concurrent revoke can win between the read and the update.
    let Some(revoked) = revoked else {
        return Ok(false);
    };

    cache.invalidate_user(revoked.delegatee_id);

    let actor_name = directory::user_display_name(pool, revoked_by).await?;
    let delegatee_name = directory::user_display_name(pool, revoked.delegatee_id).await?;
    audit::record(
        pool,
        AuditEvent::new("delegation.revoked")
            .actor(Some(revoked_by), actor_name.as_deref())
            .subject("user", Some(revoked.delegatee_id), delegatee_name.as_deref())
            .source("delegation", Some(revoked.id))
            .metadata(serde_json::json!({
                "slug": revoked.permission_slug,
                "scope_id": revoked.scope_id,
                "reason": reason,
            })),
    )
    .await;

    notifier.delegation_revoked(&revoked);
    Ok(true)
}

/// Check an extension before it touches the row: revoked delegations cannot
/// be extended, and the new expiration must be in the future and later than
/// the current one (extensions only move forward).
pub fn validate_extension(
    existing: &PermissionDelegation,
    new_expiration: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), DelegationError> {
    if existing.revoked_at.is_some() {
        return Err(DelegationError::AlreadyRevoked);
    }
    if new_expiration <= now {
        return Err(DelegationError::ExpiryInPast);
    }
    if new_expiration <= existing.valid_until {
        return Err(DelegationError::ExpiryNotMonotonic);
    }
    Ok(())
}

/// Push a delegation's expiration forward. Extensions are monotonic: the new
/// expiration must be in the future and later than the current one.
#[tracing::instrument(skip(pool))]
pub async fn extend_delegation(
    pool: &PgPool,
    delegation_id: Uuid,
    new_expiration: DateTime<Utc>,
    extended_by: Uuid,
) -> Result<PermissionDelegation, DelegationError> {
    let Some(existing) = queries::find_delegation(pool, delegation_id).await? else {
        return Err(DelegationError::NotFound);
    };
    validate_extension(&existing, new_expiration, Utc::now())?;

    let extended = sqlx::query_as::<_, PermissionDelegation>(&format!(
        r"
        UPDATE permission_delegations
        SET valid_until = $2
        WHERE id = $1
        RETURNING {DELEGATION_COLUMNS}
        "
    ))
    .bind(delegation_id)
    .bind(new_expiration)
    .fetch_one(pool)
    .await?;

    let actor_name = directory::user_display_name(pool, extended_by).await?;
    audit::record(
        pool,
        AuditEvent::new("delegation.extended")
            .actor(Some(extended_by), actor_name.as_deref())
            .subject(
                "delegation",
                Some(extended.id),
                Some(&extended.permission_slug),
            )
            .metadata(serde_json::json!({
                "from": existing.valid_until,
                "to": extended.valid_until,
            })),
    )
    .await;

    Ok(extended)
}

/// Reporting sweep over lapsed delegations.
///
/// Expiry is enforced by predicate wherever delegations are read; mutating
/// `revoked_at` here would race those reads for no gain. The sweep only logs
/// and notifies, and returns what it found.
#[tracing::instrument(skip(pool, notifier))]
pub async fn expire_expired_delegations(
    pool: &PgPool,
    notifier: &dyn Notifier,
) -> Result<Vec<PermissionDelegation>, DelegationError> {
    let lapsed = queries::lapsed_delegations(pool).await?;
    if lapsed.is_empty() {
        return Ok(lapsed);
    }

    for delegation in &lapsed {
        notifier.delegation_expired(delegation);
    }

    audit::record(
        pool,
        AuditEvent::new("delegation.expiry_sweep")
            .metadata(serde_json::json!({ "lapsed": lapsed.len() })),
    )
    .await;

    tracing::info!(count = lapsed.len(), "Delegation expiry sweep completed");
    Ok(lapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn delegation() -> PermissionDelegation {
        let now = Utc::now();
        PermissionDelegation {
            id: Uuid::new_v4(),
            delegator_id: Uuid::new_v4(),
            delegatee_id: Uuid::new_v4(),
            permission_slug: "orders.approve".to_string(),
            scope_id: None,
            valid_from: now - Duration::hours(1),
            valid_until: now + Duration::hours(4),
            can_redelegate: false,
            max_redelegation_depth: 0,
            reason: None,
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
            created_at: now,
        }
    }

    #[test]
    fn test_extension_moves_forward() {
        let d = delegation();
        let later = d.valid_until + Duration::hours(1);
        assert!(validate_extension(&d, later, Utc::now()).is_ok());
    }

    #[test]
    fn test_extension_never_decreases_expiry() {
        let d = delegation();
        let earlier = d.valid_until - Duration::hours(1);
        assert!(matches!(
            validate_extension(&d, earlier, Utc::now()),
            Err(DelegationError::ExpiryNotMonotonic)
        ));

        // equal is not an extension either
        assert!(matches!(
            validate_extension(&d, d.valid_until, Utc::now()),
            Err(DelegationError::ExpiryNotMonotonic)
        ));
    }

    #[test]
    fn test_extension_into_the_past_rejected() {
        let mut d = delegation();
        d.valid_until = Utc::now() - Duration::hours(2);
        let past = Utc::now() - Duration::hours(1);
        assert!(matches!(
            validate_extension(&d, past, Utc::now()),
            Err(DelegationError::ExpiryInPast)
        ));
    }

    #[test]
    fn test_revoked_delegation_cannot_be_extended() {
        let mut d = delegation();
        d.revoked_at = Some(Utc::now());
        let later = d.valid_until + Duration::hours(1);
        assert!(matches!(
            validate_extension(&d, later, Utc::now()),
            Err(DelegationError::AlreadyRevoked)
        ));
    }
}

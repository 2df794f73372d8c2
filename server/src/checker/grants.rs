//! Direct grant lifecycle.
//!
//! Every mutation invalidates the grantee's cached resolution and writes an
//! audit entry with names snapshotted at call time.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditEvent};
use crate::catalog::PermissionSlug;
use crate::directory;

use super::{GrantSource, ResolutionCache, UserPermission};

const GRANT_COLUMNS: &str = "id, user_id, permission_slug, scope_id, source, conditions, expires_at, granted_by, created_at, updated_at";

/// Grant a permission directly to a user.
///
/// Upserts on `(user, slug, scope)`: re-granting refreshes conditions, expiry
/// and source rather than stacking rows.
#[tracing::instrument(skip(pool, cache, conditions))]
pub async fn grant_permission(
    pool: &PgPool,
    cache: &ResolutionCache,
    user_id: Uuid,
    slug: &PermissionSlug,
    scope_id: Option<Uuid>,
    source: GrantSource,
    conditions: Option<serde_json::Value>,
    expires_at: Option<DateTime<Utc>>,
    granted_by: Option<Uuid>,
) -> sqlx::Result<UserPermission> {
    let grant = sqlx::query_as::<_, UserPermission>(&format!(
        r"
        INSERT INTO user_permissions
            (user_id, permission_slug, scope_id, source, conditions, expires_at, granted_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, permission_slug, scope_id) DO UPDATE
        SET source = EXCLUDED.source,
            conditions = EXCLUDED.conditions,
            expires_at = EXCLUDED.expires_at,
            granted_by = EXCLUDED.granted_by,
            updated_at = NOW()
        RETURNING {GRANT_COLUMNS}
        "
    ))
    .bind(user_id)
    .bind(slug.as_str())
    .bind(scope_id)
    .bind(source.as_str())
    .bind(conditions)
    .bind(expires_at)
    .bind(granted_by)
    .fetch_one(pool)
    .await?;

    cache.invalidate_user(user_id);

    let user_name = directory::user_display_name(pool, user_id).await?;
    let actor_name = match granted_by {
        Some(actor) => directory::user_display_name(pool, actor).await?,
        None => None,
    };
    audit::record(
        pool,
        AuditEvent::new("permission.granted")
            .actor(granted_by, actor_name.as_deref())
            .subject("user", Some(user_id), user_name.as_deref())
            .source(source.as_str(), Some(grant.id))
            .metadata(serde_json::json!({
                "slug": grant.permission_slug,
                "scope_id": grant.scope_id,
                "expires_at": grant.expires_at,
            })),
    )
    .await;

    Ok(grant)
}

/// Remove a direct grant. Returns `false` if no matching row existed.
#[tracing::instrument(skip(pool, cache))]
pub async fn revoke_grant(
    pool: &PgPool,
    cache: &ResolutionCache,
    user_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
    revoked_by: Option<Uuid>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r"
        DELETE FROM user_permissions
        WHERE user_id = $1
          AND permission_slug = $2
          AND scope_id IS NOT DISTINCT FROM $3
        ",
    )
    .bind(user_id)
    .bind(slug)
    .bind(scope_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    cache.invalidate_user(user_id);

    let user_name = directory::user_display_name(pool, user_id).await?;
    let actor_name = match revoked_by {
        Some(actor) => directory::user_display_name(pool, actor).await?,
        None => None,
    };
    audit::record(
        pool,
        AuditEvent::new("permission.revoked")
            .actor(revoked_by, actor_name.as_deref())
            .subject("user", Some(user_id), user_name.as_deref())
            .metadata(serde_json::json!({
                "slug": slug,
                "scope_id": scope_id,
            })),
    )
    .await;

    Ok(true)
}

/// Sweep away grants whose expiry has lapsed.
///
/// Expiry is already enforced by predicate on every read; this only reclaims
/// the rows. Returns the number removed.
#[tracing::instrument(skip(pool, cache))]
pub async fn delete_expired_grants(pool: &PgPool, cache: &ResolutionCache) -> sqlx::Result<u64> {
    let affected: Vec<Uuid> = sqlx::query_scalar(
        r"
        DELETE FROM user_permissions
        WHERE expires_at IS NOT NULL
          AND expires_at <= NOW()
        RETURNING user_id
        ",
    )
    .fetch_all(pool)
    .await?;

    let removed = affected.len() as u64;
    if removed > 0 {
        let mut users = affected;
        users.sort_unstable();
        users.dedup();
        cache.invalidate_users(&users);

        audit::record(
            pool,
            AuditEvent::new("permission.expired_swept")
                .metadata(serde_json::json!({ "removed": removed })),
        )
        .await;
    }

    Ok(removed)
}

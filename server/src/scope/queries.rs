//! Database queries for scope resolution.

use sqlx::PgPool;
use uuid::Uuid;

use crate::directory;

use super::types::{EntityRef, Scope};
use super::ScopeCache;

const SCOPE_COLUMNS: &str = "id, entity_type, entity_id, scope_key, display_name, is_active, deleted_at, created_at, updated_at";

/// Resolve an entity to its canonical scope, creating the row if absent.
///
/// Idempotent: the insert upserts on the unique `(entity_type, entity_id)`
/// pair, so concurrent resolution of the same entity converges on one row.
#[tracing::instrument(skip(pool, cache))]
pub async fn resolve(pool: &PgPool, cache: &ScopeCache, entity: EntityRef) -> sqlx::Result<Scope> {
    let key = entity.scope_key();
    if let Some(scope) = cache.get_by_key(&key) {
        return Ok(scope);
    }

    let display_name = directory::display_name(pool, entity.kind, entity.id).await?;

    let scope = sqlx::query_as::<_, Scope>(&format!(
        r"
        INSERT INTO scopes (entity_type, entity_id, scope_key, display_name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (entity_type, entity_id) DO UPDATE
        SET updated_at = NOW()
        RETURNING {SCOPE_COLUMNS}
        "
    ))
    .bind(entity.kind.as_str())
    .bind(entity.id)
    .bind(&key)
    .bind(display_name)
    .fetch_one(pool)
    .await?;

    cache.insert(&scope);
    Ok(scope)
}

/// Resolve a `"type:id"` key to a scope.
///
/// Unknown entity types return `None`; callers treat the check as unscoped.
pub async fn resolve_key(
    pool: &PgPool,
    cache: &ScopeCache,
    key: &str,
) -> sqlx::Result<Option<Scope>> {
    let Some(entity) = EntityRef::parse_key(key) else {
        return Ok(None);
    };
    resolve(pool, cache, entity).await.map(Some)
}

/// Fetch a scope by id without creating anything.
pub async fn find_scope(
    pool: &PgPool,
    cache: &ScopeCache,
    scope_id: Uuid,
) -> sqlx::Result<Option<Scope>> {
    if let Some(scope) = cache.get_by_id(scope_id) {
        return Ok(Some(scope));
    }

    let scope = sqlx::query_as::<_, Scope>(&format!(
        r"
        SELECT {SCOPE_COLUMNS}
        FROM scopes
        WHERE id = $1
        "
    ))
    .bind(scope_id)
    .fetch_optional(pool)
    .await?;

    if let Some(scope) = &scope {
        cache.insert(scope);
    }
    Ok(scope)
}

/// Deactivate a scope and purge it from the cache.
///
/// History referencing the scope (grants, delegations, audit rows) is kept.
/// Returns `false` if the scope was already inactive or missing.
#[tracing::instrument(skip(pool, cache))]
pub async fn deactivate(pool: &PgPool, cache: &ScopeCache, scope_id: Uuid) -> sqlx::Result<bool> {
    let scope = sqlx::query_as::<_, Scope>(&format!(
        r"
        UPDATE scopes
        SET is_active = false, updated_at = NOW()
        WHERE id = $1
          AND is_active = true
        RETURNING {SCOPE_COLUMNS}
        "
    ))
    .bind(scope_id)
    .fetch_optional(pool)
    .await?;

    match scope {
        Some(scope) => {
            cache.invalidate(&scope);
            Ok(true)
        }
        None => Ok(false),
    }
}

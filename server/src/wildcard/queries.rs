//! Database queries for wildcard expansion.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::catalog::Permission;

use super::pattern::{classify, macro_permissions, matches_pattern, PatternType};
use super::{PermissionWildcard, WildcardError};

const WILDCARD_COLUMNS: &str = "id, pattern, pattern_type, auto_expand, is_active, last_expanded_at, permissions_count, created_at, updated_at";

const PERMISSION_COLUMNS: &str = "id, slug, name, group_id, description, created_at, updated_at";

/// Fetch a wildcard by id.
pub async fn find_wildcard(
    pool: &PgPool,
    wildcard_id: Uuid,
) -> sqlx::Result<Option<PermissionWildcard>> {
    sqlx::query_as::<_, PermissionWildcard>(&format!(
        r"
        SELECT {WILDCARD_COLUMNS}
        FROM permission_wildcards
        WHERE id = $1
        "
    ))
    .bind(wildcard_id)
    .fetch_optional(pool)
    .await
}

/// Register a wildcard. The stored `pattern_type` is derived from the pattern,
/// never supplied by the caller.
pub async fn create_wildcard(
    pool: &PgPool,
    pattern: &str,
    auto_expand: bool,
) -> sqlx::Result<PermissionWildcard> {
    sqlx::query_as::<_, PermissionWildcard>(&format!(
        r"
        INSERT INTO permission_wildcards (pattern, pattern_type, auto_expand)
        VALUES ($1, $2, $3)
        ON CONFLICT (pattern) DO UPDATE
        SET auto_expand = EXCLUDED.auto_expand, updated_at = NOW()
        RETURNING {WILDCARD_COLUMNS}
        "
    ))
    .bind(pattern)
    .bind(classify(pattern).as_str())
    .bind(auto_expand)
    .fetch_one(pool)
    .await
}

/// Materialize a pattern against the current catalog.
pub async fn expand(pool: &PgPool, pattern: &str) -> sqlx::Result<Vec<Permission>> {
    match classify(pattern) {
        PatternType::Full => {
            sqlx::query_as::<_, Permission>(&format!(
                "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY slug"
            ))
            .fetch_all(pool)
            .await
        }
        PatternType::Resource => {
            let prefix = format!("{}%", &pattern[..pattern.len() - 1]);
            sqlx::query_as::<_, Permission>(&format!(
                "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE slug LIKE $1 ORDER BY slug"
            ))
            .bind(prefix)
            .fetch_all(pool)
            .await
        }
        PatternType::Action => {
            let suffix = format!("%{}", &pattern[1..]);
            sqlx::query_as::<_, Permission>(&format!(
                "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE slug LIKE $1 ORDER BY slug"
            ))
            .bind(suffix)
            .fetch_all(pool)
            .await
        }
        PatternType::Macro => {
            let slugs: Vec<String> = macro_permissions(pattern)
                .iter()
                .map(ToString::to_string)
                .collect();
            if slugs.is_empty() {
                return Ok(Vec::new());
            }
            sqlx::query_as::<_, Permission>(&format!(
                "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE slug = ANY($1) ORDER BY slug"
            ))
            .bind(&slugs)
            .fetch_all(pool)
            .await
        }
    }
}

async fn rebuild_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    wildcard: &PermissionWildcard,
) -> sqlx::Result<i64> {
    // Detach the cached set, then reattach from a fresh expansion. The pivot
    // rows are tagged with the expansion timestamp so stale reads are visible.
    sqlx::query("DELETE FROM wildcard_permissions WHERE wildcard_id = $1")
        .bind(wildcard.id)
        .execute(&mut **tx)
        .await?;

    let count: i64 = match classify(&wildcard.pattern) {
        PatternType::Full => {
            sqlx::query_scalar(
                r"
                WITH attached AS (
                    INSERT INTO wildcard_permissions (wildcard_id, permission_id, expanded_at)
                    SELECT $1, id, NOW() FROM permissions
                    RETURNING 1
                )
                SELECT COUNT(*) FROM attached
                ",
            )
            .bind(wildcard.id)
            .fetch_one(&mut **tx)
            .await?
        }
        PatternType::Resource | PatternType::Action => {
            let like = match classify(&wildcard.pattern) {
                PatternType::Resource => {
                    format!("{}%", &wildcard.pattern[..wildcard.pattern.len() - 1])
                }
                _ => format!("%{}", &wildcard.pattern[1..]),
            };
            sqlx::query_scalar(
                r"
                WITH attached AS (
                    INSERT INTO wildcard_permissions (wildcard_id, permission_id, expanded_at)
                    SELECT $1, id, NOW() FROM permissions WHERE slug LIKE $2
                    RETURNING 1
                )
                SELECT COUNT(*) FROM attached
                ",
            )
            .bind(wildcard.id)
            .bind(like)
            .fetch_one(&mut **tx)
            .await?
        }
        PatternType::Macro => {
            let slugs: Vec<String> = macro_permissions(&wildcard.pattern)
                .iter()
                .map(ToString::to_string)
                .collect();
            if slugs.is_empty() {
                0
            } else {
                sqlx::query_scalar(
                    r"
                    WITH attached AS (
                        INSERT INTO wildcard_permissions (wildcard_id, permission_id, expanded_at)
                        SELECT $1, id, NOW() FROM permissions WHERE slug = ANY($2)
                        RETURNING 1
                    )
                    SELECT COUNT(*) FROM attached
                    ",
                )
                .bind(wildcard.id)
                .bind(&slugs)
                .fetch_one(&mut **tx)
                .await?
            }
        }
    };

    sqlx::query(
        r"
        UPDATE permission_wildcards
        SET last_expanded_at = NOW(), permissions_count = $2::int, updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(wildcard.id)
    .bind(count)
    .execute(&mut **tx)
    .await?;

    Ok(count)
}

/// Rebuild one wildcard's cached expansion. Returns the new permission count.
#[tracing::instrument(skip(pool))]
pub async fn rebuild_expansions(pool: &PgPool, wildcard_id: Uuid) -> Result<i64, WildcardError> {
    let Some(wildcard) = find_wildcard(pool, wildcard_id).await? else {
        return Err(WildcardError::NotFound);
    };

    let mut tx = pool.begin().await?;
    let count = rebuild_in_tx(&mut tx, &wildcard).await?;
    tx.commit().await?;

    tracing::info!(pattern = %wildcard.pattern, count, "Wildcard expansion rebuilt");
    Ok(count)
}

/// Rebuild every active auto-expanding wildcard. Returns `(wildcard, count)`
/// pairs for the maintenance job's report.
#[tracing::instrument(skip(pool))]
pub async fn auto_expand_all(pool: &PgPool) -> Result<Vec<(Uuid, i64)>, WildcardError> {
    let wildcards = sqlx::query_as::<_, PermissionWildcard>(&format!(
        r"
        SELECT {WILDCARD_COLUMNS}
        FROM permission_wildcards
        WHERE auto_expand = true
          AND is_active = true
        ORDER BY pattern
        "
    ))
    .fetch_all(pool)
    .await?;

    let mut results = Vec::with_capacity(wildcards.len());
    for wildcard in wildcards {
        let mut tx = pool.begin().await?;
        let count = rebuild_in_tx(&mut tx, &wildcard).await?;
        tx.commit().await?;
        results.push((wildcard.id, count));
    }

    Ok(results)
}

/// Catalog-change hook: re-expand every active auto-expanding wildcard whose
/// pattern covers `slug`. Invoked on permission create and slug rename.
pub async fn refresh_matching_expansions(pool: &PgPool, slug: &str) -> sqlx::Result<u32> {
    let wildcards = sqlx::query_as::<_, PermissionWildcard>(&format!(
        r"
        SELECT {WILDCARD_COLUMNS}
        FROM permission_wildcards
        WHERE auto_expand = true
          AND is_active = true
        "
    ))
    .fetch_all(pool)
    .await?;

    let mut refreshed = 0;
    for wildcard in wildcards {
        if matches_pattern(slug, &wildcard.pattern) {
            let mut tx = pool.begin().await?;
            rebuild_in_tx(&mut tx, &wildcard).await?;
            tx.commit().await?;
            refreshed += 1;
        }
    }

    Ok(refreshed)
}

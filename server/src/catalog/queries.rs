//! Database queries for the permission catalog.

use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditEvent};
use crate::wildcard;

use super::{CatalogError, Permission, PermissionSlug};

/// Find a catalog entry by slug.
pub async fn find_permission_by_slug(
    pool: &PgPool,
    slug: &str,
) -> sqlx::Result<Option<Permission>> {
    sqlx::query_as::<_, Permission>(
        r"
        SELECT id, slug, name, group_id, description, created_at, updated_at
        FROM permissions
        WHERE slug = $1
        ",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await
}

/// List catalog entries, ordered by slug.
pub async fn list_permissions(pool: &PgPool) -> sqlx::Result<Vec<Permission>> {
    sqlx::query_as::<_, Permission>(
        r"
        SELECT id, slug, name, group_id, description, created_at, updated_at
        FROM permissions
        ORDER BY slug ASC
        ",
    )
    .fetch_all(pool)
    .await
}

/// Create a catalog entry.
///
/// After the insert, every active auto-expanding wildcard whose pattern covers
/// the new slug has its cached expansion rebuilt, so the derived pivot sets
/// never lag behind the catalog.
#[tracing::instrument(skip(pool))]
pub async fn create_permission(
    pool: &PgPool,
    slug: &PermissionSlug,
    name: &str,
    group_id: Option<Uuid>,
    description: Option<&str>,
    actor_id: Option<Uuid>,
    actor_name: Option<&str>,
) -> Result<Permission, CatalogError> {
    let inserted = sqlx::query_as::<_, Permission>(
        r"
        INSERT INTO permissions (slug, name, group_id, description)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (slug) DO NOTHING
        RETURNING id, slug, name, group_id, description, created_at, updated_at
        ",
    )
    .bind(slug.as_str())
    .bind(name)
    .bind(group_id)
    .bind(description)
    .fetch_optional(pool)
    .await?;

    let Some(permission) = inserted else {
        return Err(CatalogError::DuplicateSlug);
    };

    wildcard::refresh_matching_expansions(pool, slug.as_str()).await?;

    audit::record(
        pool,
        AuditEvent::new("permission.created")
            .actor(actor_id, actor_name)
            .subject("permission", Some(permission.id), Some(&permission.name))
            .metadata(serde_json::json!({ "slug": permission.slug })),
    )
    .await;

    Ok(permission)
}

/// Rename a permission slug.
///
/// Every active auto-expanding wildcard touching either the old or the new slug
/// is re-expanded afterwards.
#[tracing::instrument(skip(pool))]
pub async fn rename_permission_slug(
    pool: &PgPool,
    permission_id: Uuid,
    new_slug: &PermissionSlug,
    actor_id: Option<Uuid>,
    actor_name: Option<&str>,
) -> Result<Permission, CatalogError> {
    let previous: Option<Permission> = sqlx::query_as(
        r"
        SELECT id, slug, name, group_id, description, created_at, updated_at
        FROM permissions
        WHERE id = $1
        ",
    )
    .bind(permission_id)
    .fetch_optional(pool)
    .await?;

    let Some(previous) = previous else {
        return Err(CatalogError::NotFound);
    };

    let updated = sqlx::query_as::<_, Permission>(
        r"
        UPDATE permissions
        SET slug = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, slug, name, group_id, description, created_at, updated_at
        ",
    )
    .bind(permission_id)
    .bind(new_slug.as_str())
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => CatalogError::DuplicateSlug,
        _ => CatalogError::Database(e),
    })?;

    wildcard::refresh_matching_expansions(pool, &previous.slug).await?;
    wildcard::refresh_matching_expansions(pool, &updated.slug).await?;

    audit::record(
        pool,
        AuditEvent::new("permission.slug_renamed")
            .actor(actor_id, actor_name)
            .subject("permission", Some(updated.id), Some(&updated.name))
            .metadata(serde_json::json!({
                "from": previous.slug,
                "to": updated.slug,
            })),
    )
    .await;

    Ok(updated)
}

/// Delete a catalog entry.
///
/// Blocked while any user grant or template references the permission. Cached
/// wildcard pivots are derived data and do not block deletion; they are
/// detached (and their counts corrected) as part of the delete.
#[tracing::instrument(skip(pool))]
pub async fn delete_permission(
    pool: &PgPool,
    permission_id: Uuid,
    actor_id: Option<Uuid>,
    actor_name: Option<&str>,
) -> Result<(), CatalogError> {
    let existing: Option<Permission> = sqlx::query_as(
        r"
        SELECT id, slug, name, group_id, description, created_at, updated_at
        FROM permissions
        WHERE id = $1
        ",
    )
    .bind(permission_id)
    .fetch_optional(pool)
    .await?;

    let Some(existing) = existing else {
        return Err(CatalogError::NotFound);
    };

    let (grants, templates): (i64, i64) = sqlx::query_as(
        r"
        SELECT
            (SELECT COUNT(*) FROM user_permissions WHERE permission_slug = $1),
            (SELECT COUNT(*) FROM template_permissions WHERE permission_id = $2)
        ",
    )
    .bind(&existing.slug)
    .bind(permission_id)
    .fetch_one(pool)
    .await?;

    if grants > 0 || templates > 0 {
        return Err(CatalogError::StillReferenced { grants, templates });
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        UPDATE permission_wildcards w
        SET permissions_count = permissions_count - 1
        WHERE id IN (SELECT wildcard_id FROM wildcard_permissions WHERE permission_id = $1)
        ",
    )
    .bind(permission_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM wildcard_permissions WHERE permission_id = $1")
        .bind(permission_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM permissions WHERE id = $1")
        .bind(permission_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    audit::record(
        pool,
        AuditEvent::new("permission.deleted")
            .actor(actor_id, actor_name)
            .subject("permission", Some(existing.id), Some(&existing.name))
            .metadata(serde_json::json!({ "slug": existing.slug })),
    )
    .await;

    Ok(())
}

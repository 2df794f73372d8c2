//! Template version control.
//!
//! Versions are immutable snapshots of a template's membership, numbered
//! monotonically per template. Publishing marks exactly one version as the
//! stable, published one; restoring overwrites the live membership from a
//! snapshot with the same detach-then-reattach pattern the wildcard rebuild
//! uses.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditEvent};
use crate::checker::ResolutionCache;
use crate::directory;

use super::queries::{find_template, TEMPLATE_COLUMNS};
use super::{PermissionTemplate, PermissionTemplateVersion, TemplateError};

const VERSION_COLUMNS: &str = "id, template_id, version, name, template_name, changelog, created_by, created_by_name, permissions, wildcards, is_stable, is_published, created_at";

/// Fetch a version by id.
pub async fn find_version(
    pool: &PgPool,
    version_id: Uuid,
) -> sqlx::Result<Option<PermissionTemplateVersion>> {
    sqlx::query_as::<_, PermissionTemplateVersion>(&format!(
        r"
        SELECT {VERSION_COLUMNS}
        FROM permission_template_versions
        WHERE id = $1
        "
    ))
    .bind(version_id)
    .fetch_optional(pool)
    .await
}

/// Snapshot a template's current membership into a new version.
#[tracing::instrument(skip(pool))]
pub async fn create_version(
    pool: &PgPool,
    template_id: Uuid,
    author_id: Option<Uuid>,
    name: Option<&str>,
    changelog: Option<&str>,
) -> Result<PermissionTemplateVersion, TemplateError> {
    let Some(template) = find_template(pool, template_id).await? else {
        return Err(TemplateError::NotFound);
    };

    let author_name = match author_id {
        Some(author) => directory::user_display_name(pool, author).await?,
        None => None,
    };

    let version = sqlx::query_as::<_, PermissionTemplateVersion>(&format!(
        r"
        INSERT INTO permission_template_versions
            (template_id, version, name, template_name, changelog, created_by, created_by_name,
             permissions, wildcards)
        SELECT
            $1,
            COALESCE((SELECT MAX(version) FROM permission_template_versions WHERE template_id = $1), 0) + 1,
            $2,
            $3,
            $4,
            $5,
            $6,
            COALESCE((
                SELECT jsonb_agg(jsonb_build_object('id', p.id, 'slug', p.slug, 'name', p.name) ORDER BY p.slug)
                FROM template_permissions tp
                INNER JOIN permissions p ON p.id = tp.permission_id
                WHERE tp.template_id = $1
            ), '[]'::jsonb),
            COALESCE((
                SELECT jsonb_agg(jsonb_build_object('id', w.id, 'pattern', w.pattern) ORDER BY tw.sort_order)
                FROM template_wildcards tw
                INNER JOIN permission_wildcards w ON w.id = tw.wildcard_id
                WHERE tw.template_id = $1
            ), '[]'::jsonb)
        RETURNING {VERSION_COLUMNS}
        "
    ))
    .bind(template_id)
    .bind(name)
    .bind(&template.name)
    .bind(changelog)
    .bind(author_id)
    .bind(&author_name)
    .fetch_one(pool)
    .await?;

    audit::record(
        pool,
        AuditEvent::new("template.version_created")
            .actor(author_id, author_name.as_deref())
            .subject("template", Some(template_id), Some(&template.name))
            .source("template_version", Some(version.id))
            .metadata(serde_json::json!({ "version": version.version })),
    )
    .await;

    Ok(version)
}

/// Publish a version, demoting any previously published one.
///
/// Idempotent no-op: publishing an already-published version returns `false`.
#[tracing::instrument(skip(pool))]
pub async fn publish_version(
    pool: &PgPool,
    version_id: Uuid,
    author_id: Option<Uuid>,
) -> Result<bool, TemplateError> {
    let Some(version) = find_version(pool, version_id).await? else {
        return Err(TemplateError::VersionNotFound);
    };
    if version.is_published {
        return Ok(false);
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE permission_template_versions SET is_published = false WHERE template_id = $1",
    )
    .bind(version.template_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r"
        UPDATE permission_template_versions
        SET is_published = true, is_stable = true
        WHERE id = $1
        ",
    )
    .bind(version_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let author_name = match author_id {
        Some(author) => directory::user_display_name(pool, author).await?,
        None => None,
    };
    audit::record(
        pool,
        AuditEvent::new("template.version_published")
            .actor(author_id, author_name.as_deref())
            .subject("template", Some(version.template_id), Some(&version.template_name))
            .source("template_version", Some(version_id))
            .metadata(serde_json::json!({ "version": version.version })),
    )
    .await;

    Ok(true)
}

/// Restore a template's metadata and membership from a snapshot.
///
/// Transactional detach-then-reattach. Snapshot entries whose permission or
/// wildcard rows have since been deleted are skipped (and counted in the audit
/// metadata).
#[tracing::instrument(skip(pool, cache))]
pub async fn restore_version(
    pool: &PgPool,
    cache: &ResolutionCache,
    version_id: Uuid,
    actor_id: Option<Uuid>,
) -> Result<PermissionTemplate, TemplateError> {
    let Some(version) = find_version(pool, version_id).await? else {
        return Err(TemplateError::VersionNotFound);
    };

    let permission_ids = snapshot_ids(&version.permissions);
    let wildcard_ids = snapshot_ids(&version.wildcards);

    let mut tx = pool.begin().await?;

    let template = sqlx::query_as::<_, PermissionTemplate>(&format!(
        r"
        UPDATE permission_templates
        SET name = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {TEMPLATE_COLUMNS}
        "
    ))
    .bind(version.template_id)
    .bind(&version.template_name)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(TemplateError::NotFound)?;

    sqlx::query("DELETE FROM template_permissions WHERE template_id = $1")
        .bind(version.template_id)
        .execute(&mut *tx)
        .await?;

    let restored_permissions: i64 = if permission_ids.is_empty() {
        0
    } else {
        sqlx::query_scalar(
            r"
            WITH attached AS (
                INSERT INTO template_permissions (template_id, permission_id, source)
                SELECT $1, id, 'direct'
                FROM permissions
                WHERE id = ANY($2)
                RETURNING 1
            )
            SELECT COUNT(*) FROM attached
            ",
        )
        .bind(version.template_id)
        .bind(&permission_ids)
        .fetch_one(&mut *tx)
        .await?
    };

    sqlx::query("DELETE FROM template_wildcards WHERE template_id = $1")
        .bind(version.template_id)
        .execute(&mut *tx)
        .await?;

    let restored_wildcards: i64 = if wildcard_ids.is_empty() {
        0
    } else {
        sqlx::query_scalar(
            r"
            WITH attached AS (
                INSERT INTO template_wildcards (template_id, wildcard_id, sort_order)
                SELECT $1, w.id, t.ordinality::int
                FROM UNNEST($2::uuid[]) WITH ORDINALITY AS t(id, ordinality)
                INNER JOIN permission_wildcards w ON w.id = t.id
                RETURNING 1
            )
            SELECT COUNT(*) FROM attached
            ",
        )
        .bind(version.template_id)
        .bind(&wildcard_ids)
        .fetch_one(&mut *tx)
        .await?
    };

    tx.commit().await?;

    let assignees: Vec<Uuid> = sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM template_assignments WHERE template_id = $1",
    )
    .bind(version.template_id)
    .fetch_all(pool)
    .await?;
    cache.invalidate_users(&assignees);

    let skipped = (permission_ids.len() as i64 - restored_permissions)
        + (wildcard_ids.len() as i64 - restored_wildcards);

    audit::record(
        pool,
        AuditEvent::new("template.version_restored")
            .actor(actor_id, None)
            .subject("template", Some(template.id), Some(&template.name))
            .source("template_version", Some(version_id))
            .metadata(serde_json::json!({
                "version": version.version,
                "permissions": restored_permissions,
                "wildcards": restored_wildcards,
                "skipped_missing": skipped,
            })),
    )
    .await;

    Ok(template)
}

/// Roll a template back `steps` versions from its latest.
///
/// Resolves `latest - steps`; returns `None` if no such version exists.
#[tracing::instrument(skip(pool, cache))]
pub async fn rollback_template(
    pool: &PgPool,
    cache: &ResolutionCache,
    template_id: Uuid,
    steps: i32,
    actor_id: Option<Uuid>,
) -> Result<Option<PermissionTemplateVersion>, TemplateError> {
    let latest: Option<i32> = sqlx::query_scalar(
        "SELECT MAX(version) FROM permission_template_versions WHERE template_id = $1",
    )
    .bind(template_id)
    .fetch_one(pool)
    .await?;

    let Some(latest) = latest else {
        return Ok(None);
    };
    let target = latest - steps;
    if target < 1 {
        return Ok(None);
    }

    let version = sqlx::query_as::<_, PermissionTemplateVersion>(&format!(
        r"
        SELECT {VERSION_COLUMNS}
        FROM permission_template_versions
        WHERE template_id = $1
          AND version = $2
        "
    ))
    .bind(template_id)
    .bind(target)
    .fetch_optional(pool)
    .await?;

    let Some(version) = version else {
        return Ok(None);
    };

    restore_version(pool, cache, version.id, actor_id).await?;
    Ok(Some(version))
}

/// Set difference of two versions' permission slugs.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VersionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub net: i64,
}

/// Compare two stored versions.
pub async fn compare_versions(
    pool: &PgPool,
    v1_id: Uuid,
    v2_id: Uuid,
) -> Result<VersionDiff, TemplateError> {
    let Some(v1) = find_version(pool, v1_id).await? else {
        return Err(TemplateError::VersionNotFound);
    };
    let Some(v2) = find_version(pool, v2_id).await? else {
        return Err(TemplateError::VersionNotFound);
    };

    Ok(compare_snapshots(&v1.permissions, &v2.permissions))
}

/// Diff two permission snapshots (`v1` as the base, `v2` as the target).
#[must_use]
pub fn compare_snapshots(v1: &Value, v2: &Value) -> VersionDiff {
    let base = snapshot_slugs(v1);
    let target = snapshot_slugs(v2);

    let added: Vec<String> = target.iter().filter(|s| !base.contains(*s)).cloned().collect();
    let removed: Vec<String> = base.iter().filter(|s| !target.contains(*s)).cloned().collect();
    let net = target.len() as i64 - base.len() as i64;

    VersionDiff { added, removed, net }
}

fn snapshot_slugs(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("slug").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn snapshot_ids(value: &Value) -> Vec<Uuid> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("id").and_then(Value::as_str))
                .filter_map(|raw| Uuid::parse_str(raw).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(slugs: &[&str]) -> Value {
        Value::Array(
            slugs
                .iter()
                .map(|s| json!({"id": Uuid::new_v4().to_string(), "slug": s, "name": s}))
                .collect(),
        )
    }

    #[test]
    fn test_compare_reports_added_and_removed() {
        let v1 = snapshot(&["shops.read", "shops.update", "orders.view"]);
        let v2 = snapshot(&["shops.read", "orders.view", "orders.approve", "payments.view"]);

        let diff = compare_snapshots(&v1, &v2);

        assert_eq!(diff.added, vec!["orders.approve", "payments.view"]);
        assert_eq!(diff.removed, vec!["shops.update"]);
        assert_eq!(diff.net, 1);
    }

    #[test]
    fn test_compare_identical_is_empty() {
        let v = snapshot(&["shops.read"]);
        let diff = compare_snapshots(&v, &v);

        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.net, 0);
    }

    #[test]
    fn test_compare_handles_empty_snapshots() {
        let empty = json!([]);
        let v = snapshot(&["shops.read", "shops.update"]);

        let grown = compare_snapshots(&empty, &v);
        assert_eq!(grown.added.len(), 2);
        assert!(grown.removed.is_empty());
        assert_eq!(grown.net, 2);

        let shrunk = compare_snapshots(&v, &empty);
        assert!(shrunk.added.is_empty());
        assert_eq!(shrunk.removed.len(), 2);
        assert_eq!(shrunk.net, -2);
    }

    #[test]
    fn test_snapshot_ids_skips_malformed_entries() {
        let value = json!([
            {"id": Uuid::new_v4().to_string(), "slug": "a.b"},
            {"id": "not-a-uuid", "slug": "c.d"},
            {"slug": "e.f"},
        ]);
        assert_eq!(snapshot_ids(&value).len(), 1);
    }
}

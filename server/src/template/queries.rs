//! Database queries for templates, membership and assignments.

use std::collections::BTreeSet;

use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditEvent};
use crate::checker::ResolutionCache;
use crate::directory;
use crate::hierarchy::{self, HierarchyFamily};
use crate::wildcard;

use super::{PermissionTemplate, TemplateAssignment, TemplateError};

pub(crate) const TEMPLATE_COLUMNS: &str = "id, slug, name, parent_id, level, is_system, auto_sync_users, description, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str =
    "id, user_id, template_id, scope_id, auto_sync, pinned_version_id, assigned_by, assigned_at";

/// Fetch a template by id.
pub async fn find_template(
    pool: &PgPool,
    template_id: Uuid,
) -> sqlx::Result<Option<PermissionTemplate>> {
    sqlx::query_as::<_, PermissionTemplate>(&format!(
        r"
        SELECT {TEMPLATE_COLUMNS}
        FROM permission_templates
        WHERE id = $1
        "
    ))
    .bind(template_id)
    .fetch_optional(pool)
    .await
}

/// Create a template and compute its closure chain.
#[tracing::instrument(skip(pool))]
pub async fn create_template(
    pool: &PgPool,
    slug: &str,
    name: &str,
    parent_id: Option<Uuid>,
    is_system: bool,
    auto_sync_users: bool,
    description: Option<&str>,
) -> Result<PermissionTemplate, TemplateError> {
    let inserted = sqlx::query_as::<_, PermissionTemplate>(&format!(
        r"
        INSERT INTO permission_templates (slug, name, parent_id, is_system, auto_sync_users, description)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (slug) DO NOTHING
        RETURNING {TEMPLATE_COLUMNS}
        "
    ))
    .bind(slug)
    .bind(name)
    .bind(parent_id)
    .bind(is_system)
    .bind(auto_sync_users)
    .bind(description)
    .fetch_optional(pool)
    .await?;

    let Some(template) = inserted else {
        return Err(TemplateError::DuplicateSlug);
    };

    let level =
        hierarchy::recompute_node(pool, HierarchyFamily::Template, template.id).await?;

    Ok(PermissionTemplate { level, ..template })
}

/// Delete a template and its descendant subtree.
///
/// Refused for system templates and while any node of the subtree still has
/// assignments; removal of a whole subtree is destructive enough without
/// silently stripping users of their templates.
#[tracing::instrument(skip(pool, cache))]
pub async fn delete_template(
    pool: &PgPool,
    cache: &ResolutionCache,
    template_id: Uuid,
    actor_id: Option<Uuid>,
    actor_name: Option<&str>,
) -> Result<u64, TemplateError> {
    let Some(template) = find_template(pool, template_id).await? else {
        return Err(TemplateError::NotFound);
    };
    if template.is_system {
        return Err(TemplateError::SystemTemplate);
    }

    let subtree = subtree_ids(pool, template_id).await?;
    let assignees: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM template_assignments WHERE template_id = ANY($1)",
    )
    .bind(&subtree)
    .fetch_one(pool)
    .await?;
    if assignees > 0 {
        return Err(TemplateError::HasAssignees(assignees));
    }

    let deleted =
        hierarchy::delete_subtree(pool, HierarchyFamily::Template, template_id, actor_id, actor_name)
            .await?;

    // Assignment-free by the guard above, but template-sourced grants from
    // earlier syncs may survive; any user who had one gets re-resolved.
    cache.clear();

    Ok(deleted)
}

async fn subtree_ids(pool: &PgPool, template_id: Uuid) -> sqlx::Result<Vec<Uuid>> {
    let mut ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT descendant_id FROM template_closure WHERE ancestor_id = $1",
    )
    .bind(template_id)
    .fetch_all(pool)
    .await?;
    ids.push(template_id);
    Ok(ids)
}

// ============================================================================
// Membership pivots
// ============================================================================

/// Attach a permission to a template.
#[tracing::instrument(skip(pool, cache))]
pub async fn attach_permission(
    pool: &PgPool,
    cache: &ResolutionCache,
    template_id: Uuid,
    permission_id: Uuid,
    source: &str,
    wildcard_id: Option<Uuid>,
) -> Result<(), TemplateError> {
    sqlx::query(
        r"
        INSERT INTO template_permissions (template_id, permission_id, source, wildcard_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (template_id, permission_id) DO UPDATE
        SET source = EXCLUDED.source, wildcard_id = EXCLUDED.wildcard_id
        ",
    )
    .bind(template_id)
    .bind(permission_id)
    .bind(source)
    .bind(wildcard_id)
    .execute(pool)
    .await?;

    after_membership_change(pool, cache, template_id).await
}

/// Detach a permission from a template. Returns `false` if it was not attached.
#[tracing::instrument(skip(pool, cache))]
pub async fn detach_permission(
    pool: &PgPool,
    cache: &ResolutionCache,
    template_id: Uuid,
    permission_id: Uuid,
) -> Result<bool, TemplateError> {
    let result = sqlx::query(
        "DELETE FROM template_permissions WHERE template_id = $1 AND permission_id = $2",
    )
    .bind(template_id)
    .bind(permission_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    after_membership_change(pool, cache, template_id).await?;
    Ok(true)
}

/// Attach a wildcard to a template at a sort position.
#[tracing::instrument(skip(pool, cache))]
pub async fn attach_wildcard(
    pool: &PgPool,
    cache: &ResolutionCache,
    template_id: Uuid,
    wildcard_id: Uuid,
    sort_order: i32,
) -> Result<(), TemplateError> {
    sqlx::query(
        r"
        INSERT INTO template_wildcards (template_id, wildcard_id, sort_order)
        VALUES ($1, $2, $3)
        ON CONFLICT (template_id, wildcard_id) DO UPDATE
        SET sort_order = EXCLUDED.sort_order
        ",
    )
    .bind(template_id)
    .bind(wildcard_id)
    .bind(sort_order)
    .execute(pool)
    .await?;

    after_membership_change(pool, cache, template_id).await
}

/// Detach a wildcard from a template.
#[tracing::instrument(skip(pool, cache))]
pub async fn detach_wildcard(
    pool: &PgPool,
    cache: &ResolutionCache,
    template_id: Uuid,
    wildcard_id: Uuid,
) -> Result<bool, TemplateError> {
    let result =
        sqlx::query("DELETE FROM template_wildcards WHERE template_id = $1 AND wildcard_id = $2")
            .bind(template_id)
            .bind(wildcard_id)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    after_membership_change(pool, cache, template_id).await?;
    Ok(true)
}

/// Resaving a template's membership invalidates every assignee of the template
/// and of its descendants (they inherit the change), and re-syncs grants where
/// the template asks for it.
async fn after_membership_change(
    pool: &PgPool,
    cache: &ResolutionCache,
    template_id: Uuid,
) -> Result<(), TemplateError> {
    let mut affected: Vec<Uuid> = sqlx::query_scalar(
        "SELECT descendant_id FROM template_closure WHERE ancestor_id = $1",
    )
    .bind(template_id)
    .fetch_all(pool)
    .await?;
    affected.push(template_id);

    let assignees: Vec<Uuid> = sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM template_assignments WHERE template_id = ANY($1)",
    )
    .bind(&affected)
    .fetch_all(pool)
    .await?;
    cache.invalidate_users(&assignees);

    let template = find_template(pool, template_id).await?;
    if template.is_some_and(|t| t.auto_sync_users) {
        sync_assignments(pool, cache, template_id).await?;
    }

    Ok(())
}

// ============================================================================
// Assignments
// ============================================================================

/// Assign a template to a user, optionally scoped and version-pinned.
#[tracing::instrument(skip(pool, cache))]
pub async fn assign_to_user(
    pool: &PgPool,
    cache: &ResolutionCache,
    user_id: Uuid,
    template_id: Uuid,
    scope_id: Option<Uuid>,
    auto_sync: bool,
    pinned_version_id: Option<Uuid>,
    assigned_by: Option<Uuid>,
) -> Result<TemplateAssignment, TemplateError> {
    let Some(template) = find_template(pool, template_id).await? else {
        return Err(TemplateError::NotFound);
    };

    let assignment = sqlx::query_as::<_, TemplateAssignment>(&format!(
        r"
        INSERT INTO template_assignments
            (user_id, template_id, scope_id, auto_sync, pinned_version_id, assigned_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, template_id, scope_id) DO UPDATE
        SET auto_sync = EXCLUDED.auto_sync,
            pinned_version_id = EXCLUDED.pinned_version_id,
            assigned_by = EXCLUDED.assigned_by
        RETURNING {ASSIGNMENT_COLUMNS}
        "
    ))
    .bind(user_id)
    .bind(template_id)
    .bind(scope_id)
    .bind(auto_sync)
    .bind(pinned_version_id)
    .bind(assigned_by)
    .fetch_one(pool)
    .await?;

    cache.invalidate_user(user_id);

    if auto_sync && template.auto_sync_users {
        sync_assignment_grants(pool, cache, &assignment).await?;
    }

    let user_name = directory::user_display_name(pool, user_id).await?;
    let actor_name = match assigned_by {
        Some(actor) => directory::user_display_name(pool, actor).await?,
        None => None,
    };
    audit::record(
        pool,
        AuditEvent::new("template.assigned")
            .actor(assigned_by, actor_name.as_deref())
            .subject("user", Some(user_id), user_name.as_deref())
            .source("template", Some(template_id))
            .metadata(serde_json::json!({
                "template": template.name,
                "scope_id": scope_id,
                "pinned_version_id": pinned_version_id,
            })),
    )
    .await;

    Ok(assignment)
}

/// Remove an assignment and any grants it synced. Returns `false` if no
/// assignment matched.
#[tracing::instrument(skip(pool, cache))]
pub async fn remove_assignment(
    pool: &PgPool,
    cache: &ResolutionCache,
    user_id: Uuid,
    template_id: Uuid,
    scope_id: Option<Uuid>,
    removed_by: Option<Uuid>,
) -> Result<bool, TemplateError> {
    let result = sqlx::query(
        r"
        DELETE FROM template_assignments
        WHERE user_id = $1
          AND template_id = $2
          AND scope_id IS NOT DISTINCT FROM $3
        ",
    )
    .bind(user_id)
    .bind(template_id)
    .bind(scope_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        r"
        DELETE FROM user_permissions
        WHERE user_id = $1
          AND source = 'template'
          AND scope_id IS NOT DISTINCT FROM $2
        ",
    )
    .bind(user_id)
    .bind(scope_id)
    .execute(pool)
    .await?;

    cache.invalidate_user(user_id);

    let user_name = directory::user_display_name(pool, user_id).await?;
    audit::record(
        pool,
        AuditEvent::new("template.unassigned")
            .actor(removed_by, None)
            .subject("user", Some(user_id), user_name.as_deref())
            .source("template", Some(template_id))
            .metadata(serde_json::json!({ "scope_id": scope_id })),
    )
    .await;

    Ok(true)
}

/// The template's full slug set: direct members, wildcard expansions and
/// everything inherited from ancestor templates.
pub async fn template_all_slugs(
    pool: &PgPool,
    template_id: Uuid,
) -> sqlx::Result<BTreeSet<String>> {
    let mut templates =
        hierarchy::queries::ancestors(pool, HierarchyFamily::Template, template_id).await?;
    templates.push(template_id);

    let mut slugs: BTreeSet<String> = sqlx::query_scalar(
        r"
        SELECT p.slug
        FROM template_permissions tp
        INNER JOIN permissions p ON p.id = tp.permission_id
        WHERE tp.template_id = ANY($1)
        ",
    )
    .bind(&templates)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    let patterns: Vec<String> = sqlx::query_scalar(
        r"
        SELECT w.pattern
        FROM template_wildcards tw
        INNER JOIN permission_wildcards w ON w.id = tw.wildcard_id
        WHERE tw.template_id = ANY($1)
          AND w.is_active = true
        ",
    )
    .bind(&templates)
    .fetch_all(pool)
    .await?;

    for pattern in patterns {
        slugs.extend(
            wildcard::expand(pool, &pattern)
                .await?
                .into_iter()
                .map(|p| p.slug),
        );
    }

    Ok(slugs)
}

/// Re-materialize template-sourced grants for every auto-sync assignee.
#[tracing::instrument(skip(pool, cache))]
pub async fn sync_assignments(
    pool: &PgPool,
    cache: &ResolutionCache,
    template_id: Uuid,
) -> Result<u64, TemplateError> {
    let assignments = sqlx::query_as::<_, TemplateAssignment>(&format!(
        r"
        SELECT {ASSIGNMENT_COLUMNS}
        FROM template_assignments
        WHERE template_id = $1
          AND auto_sync = true
          AND pinned_version_id IS NULL
        "
    ))
    .bind(template_id)
    .fetch_all(pool)
    .await?;

    let mut synced = 0;
    for assignment in &assignments {
        synced += sync_assignment_grants(pool, cache, assignment).await?;
    }

    if !assignments.is_empty() {
        audit::record(
            pool,
            AuditEvent::new("template.synced")
                .subject("template", Some(template_id), None)
                .metadata(serde_json::json!({
                    "assignees": assignments.len(),
                    "grants": synced,
                })),
        )
        .await;
    }

    Ok(synced)
}

/// Replace one assignee's template-sourced grants with the template's current
/// slug set, atomically.
async fn sync_assignment_grants(
    pool: &PgPool,
    cache: &ResolutionCache,
    assignment: &TemplateAssignment,
) -> Result<u64, TemplateError> {
    let slugs = template_all_slugs(pool, assignment.template_id).await?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        DELETE FROM user_permissions
        WHERE user_id = $1
          AND source = 'template'
          AND scope_id IS NOT DISTINCT FROM $2
        ",
    )
    .bind(assignment.user_id)
    .bind(assignment.scope_id)
    .execute(&mut *tx)
    .await?;

    let slug_list: Vec<String> = slugs.into_iter().collect();
    if !slug_list.is_empty() {
        sqlx::query(
            r"
            INSERT INTO user_permissions (user_id, permission_slug, scope_id, source, granted_by)
            SELECT $1, slug, $2, 'template', $3
            FROM UNNEST($4::text[]) AS t(slug)
            ON CONFLICT (user_id, permission_slug, scope_id) DO UPDATE
            SET source = 'template', updated_at = NOW()
            ",
        )
        .bind(assignment.user_id)
        .bind(assignment.scope_id)
        .bind(assignment.assigned_by)
        .bind(&slug_list)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    cache.invalidate_user(assignment.user_id);
    Ok(slug_list.len() as u64)
}

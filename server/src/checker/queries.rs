//! Resolution queries.
//!
//! Scope predicate used throughout: a global row (`scope_id IS NULL`) applies
//! to every check; a scoped row applies only to its own scope; an unscoped
//! check sees only global rows. The SQL form `(scope_id IS NULL OR scope_id =
//! $n)` covers both cases because `= NULL` is never true.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::conditions::{ConditionEvaluator, ConditionSet, Principal, RequestContext};
use crate::hierarchy::{self, HierarchyFamily};
use crate::wildcard::{self, matches_pattern};

use super::ResolutionCache;

/// Load the principal state the condition evaluator needs.
///
/// An unknown user evaluates with everything unset, which fails any condition
/// that requires a verified state.
pub async fn load_principal(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Principal> {
    let row: Option<(bool, bool, Option<Value>)> = sqlx::query_as(
        r"
        SELECT totp_enabled, email_verified, attributes
        FROM users
        WHERE id = $1
        ",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let mut principal = Principal::new(user_id);
    if let Some((totp, email, attributes)) = row {
        principal.totp_verified = totp;
        principal.email_verified = email;
        principal.attributes = attributes.unwrap_or(Value::Null);
    }
    Ok(principal)
}

/// Decide whether `user` effectively holds `slug` in `scope`.
#[tracing::instrument(skip(pool, evaluator, ctx))]
pub async fn has_permission(
    pool: &PgPool,
    evaluator: &ConditionEvaluator,
    user_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
    ctx: Option<&RequestContext>,
) -> sqlx::Result<bool> {
    let now = Utc::now();

    if direct_source(pool, evaluator, user_id, slug, scope_id, ctx, now).await? {
        return Ok(true);
    }
    if template_source(pool, user_id, slug, scope_id).await? {
        return Ok(true);
    }
    delegated_source(pool, user_id, slug, scope_id).await
}

/// Decide ignoring the delegation source. The delegator uses this to tell a
/// permission held in one's own right from one held only by delegation.
pub async fn has_own_permission(
    pool: &PgPool,
    evaluator: &ConditionEvaluator,
    user_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
    ctx: Option<&RequestContext>,
) -> sqlx::Result<bool> {
    let now = Utc::now();

    if direct_source(pool, evaluator, user_id, slug, scope_id, ctx, now).await? {
        return Ok(true);
    }
    template_source(pool, user_id, slug, scope_id).await
}

/// Compose a scope check with a separately supplied condition set, for one-off
/// contextual gates beyond what is stored on the grant.
pub async fn check_with_conditions(
    pool: &PgPool,
    evaluator: &ConditionEvaluator,
    user_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
    extra: &ConditionSet,
    ctx: Option<&RequestContext>,
) -> sqlx::Result<bool> {
    if !has_permission(pool, evaluator, user_id, slug, scope_id, ctx).await? {
        return Ok(false);
    }
    if extra.is_empty() {
        return Ok(true);
    }

    let principal = load_principal(pool, user_id).await?;
    Ok(evaluator.evaluate(extra, &principal, ctx, Utc::now()))
}

/// The full effective permission set for `(user, scope)`, cached for the
/// configured TTL.
///
/// The union is advisory: grants carrying conditions are included here, and the
/// conditions are enforced when the permission is actually checked.
#[tracing::instrument(skip(pool, cache))]
pub async fn get_all_user_permissions(
    pool: &PgPool,
    cache: &ResolutionCache,
    user_id: Uuid,
    scope_id: Option<Uuid>,
) -> sqlx::Result<BTreeSet<String>> {
    if let Some(cached) = cache.get(user_id, scope_id) {
        return Ok(cached);
    }

    let mut slugs = BTreeSet::new();

    let direct: Vec<String> = sqlx::query_scalar(
        r"
        SELECT permission_slug
        FROM user_permissions
        WHERE user_id = $1
          AND (scope_id IS NULL OR scope_id = $2)
          AND (expires_at IS NULL OR expires_at > NOW())
        ",
    )
    .bind(user_id)
    .bind(scope_id)
    .fetch_all(pool)
    .await?;
    slugs.extend(direct);

    let delegated: Vec<String> = sqlx::query_scalar(
        r"
        SELECT permission_slug
        FROM permission_delegations
        WHERE delegatee_id = $1
          AND (scope_id IS NULL OR scope_id = $2)
          AND revoked_at IS NULL
          AND valid_from <= NOW()
          AND valid_until > NOW()
        ",
    )
    .bind(user_id)
    .bind(scope_id)
    .fetch_all(pool)
    .await?;
    slugs.extend(delegated);

    for assignment in load_assignments(pool, user_id, scope_id).await? {
        match assignment.pinned_version_id {
            Some(version_id) => {
                let (snapshot_slugs, patterns) = snapshot_membership(pool, version_id).await?;
                slugs.extend(snapshot_slugs);
                for pattern in patterns {
                    slugs.extend(
                        wildcard::expand(pool, &pattern)
                            .await?
                            .into_iter()
                            .map(|p| p.slug),
                    );
                }
            }
            None => {
                let templates = with_ancestors(pool, assignment.template_id).await?;

                let member_slugs: Vec<String> = sqlx::query_scalar(
                    r"
                    SELECT p.slug
                    FROM template_permissions tp
                    INNER JOIN permissions p ON p.id = tp.permission_id
                    WHERE tp.template_id = ANY($1)
                    ",
                )
                .bind(&templates)
                .fetch_all(pool)
                .await?;
                slugs.extend(member_slugs);

                for pattern in template_patterns(pool, &templates).await? {
                    slugs.extend(
                        wildcard::expand(pool, &pattern)
                            .await?
                            .into_iter()
                            .map(|p| p.slug),
                    );
                }
            }
        }
    }

    cache.insert(user_id, scope_id, slugs.clone());
    Ok(slugs)
}

// ============================================================================
// Sources
// ============================================================================

async fn direct_source(
    pool: &PgPool,
    evaluator: &ConditionEvaluator,
    user_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
    ctx: Option<&RequestContext>,
    now: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let condition_rows: Vec<Option<Value>> = sqlx::query_scalar(
        r"
        SELECT conditions
        FROM user_permissions
        WHERE user_id = $1
          AND permission_slug = $2
          AND (scope_id IS NULL OR scope_id = $3)
          AND (expires_at IS NULL OR expires_at > NOW())
        ",
    )
    .bind(user_id)
    .bind(slug)
    .bind(scope_id)
    .fetch_all(pool)
    .await?;

    if condition_rows.iter().any(Option::is_none) {
        return Ok(true);
    }
    if condition_rows.is_empty() {
        return Ok(false);
    }

    // Only load the principal when a conditioned grant forces an evaluation.
    let principal = load_principal(pool, user_id).await?;
    Ok(condition_rows
        .iter()
        .any(|stored| evaluator.evaluate_stored(stored.as_ref(), &principal, ctx, now)))
}

async fn template_source(
    pool: &PgPool,
    user_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
) -> sqlx::Result<bool> {
    let assignments = load_assignments(pool, user_id, scope_id).await?;
    if assignments.is_empty() {
        return Ok(false);
    }

    // The closure table flattens ancestor resolution, so inheritance cannot
    // recurse; the visited set only avoids re-checking shared ancestors.
    let mut visited: HashSet<Uuid> = HashSet::new();

    for assignment in assignments {
        if let Some(version_id) = assignment.pinned_version_id {
            let (snapshot_slugs, patterns) = snapshot_membership(pool, version_id).await?;
            if snapshot_slugs.iter().any(|s| s == slug)
                || patterns.iter().any(|p| matches_pattern(slug, p))
            {
                return Ok(true);
            }
            continue;
        }

        let templates: Vec<Uuid> = with_ancestors(pool, assignment.template_id)
            .await?
            .into_iter()
            .filter(|id| visited.insert(*id))
            .collect();
        if templates.is_empty() {
            continue;
        }

        let direct_hit: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS(
                SELECT 1
                FROM template_permissions tp
                INNER JOIN permissions p ON p.id = tp.permission_id
                WHERE tp.template_id = ANY($1)
                  AND p.slug = $2
            )
            ",
        )
        .bind(&templates)
        .bind(slug)
        .fetch_one(pool)
        .await?;
        if direct_hit {
            return Ok(true);
        }

        for pattern in template_patterns(pool, &templates).await? {
            if matches_pattern(slug, &pattern) {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

async fn delegated_source(
    pool: &PgPool,
    user_id: Uuid,
    slug: &str,
    scope_id: Option<Uuid>,
) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        r"
        SELECT EXISTS(
            SELECT 1
            FROM permission_delegations
            WHERE delegatee_id = $1
              AND permission_slug = $2
              AND (scope_id IS NULL OR scope_id = $3)
              AND revoked_at IS NULL
              AND valid_from <= NOW()
              AND valid_until > NOW()
        )
        ",
    )
    .bind(user_id)
    .bind(slug)
    .bind(scope_id)
    .fetch_one(pool)
    .await
}

// ============================================================================
// Template plumbing
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct AssignmentRow {
    template_id: Uuid,
    pinned_version_id: Option<Uuid>,
}

async fn load_assignments(
    pool: &PgPool,
    user_id: Uuid,
    scope_id: Option<Uuid>,
) -> sqlx::Result<Vec<AssignmentRow>> {
    sqlx::query_as::<_, AssignmentRow>(
        r"
        SELECT template_id, pinned_version_id
        FROM template_assignments
        WHERE user_id = $1
          AND (scope_id IS NULL OR scope_id = $2)
        ",
    )
    .bind(user_id)
    .bind(scope_id)
    .fetch_all(pool)
    .await
}

/// A template id plus its ancestor chain, nearest first.
async fn with_ancestors(pool: &PgPool, template_id: Uuid) -> sqlx::Result<Vec<Uuid>> {
    let mut ids = vec![template_id];
    ids.extend(hierarchy::queries::ancestors(pool, HierarchyFamily::Template, template_id).await?);
    Ok(ids)
}

async fn template_patterns(pool: &PgPool, template_ids: &[Uuid]) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar(
        r"
        SELECT w.pattern
        FROM template_wildcards tw
        INNER JOIN permission_wildcards w ON w.id = tw.wildcard_id
        WHERE tw.template_id = ANY($1)
          AND w.is_active = true
        ORDER BY tw.sort_order ASC
        ",
    )
    .bind(template_ids)
    .fetch_all(pool)
    .await
}

/// Permission slugs and wildcard patterns frozen in a version snapshot.
async fn snapshot_membership(
    pool: &PgPool,
    version_id: Uuid,
) -> sqlx::Result<(Vec<String>, Vec<String>)> {
    let row: Option<(Value, Value)> = sqlx::query_as(
        r"
        SELECT permissions, wildcards
        FROM permission_template_versions
        WHERE id = $1
        ",
    )
    .bind(version_id)
    .fetch_optional(pool)
    .await?;

    let Some((permissions, wildcards)) = row else {
        return Ok((Vec::new(), Vec::new()));
    };

    let slugs = permissions
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("slug").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    let patterns = wildcards
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("pattern").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok((slugs, patterns))
}

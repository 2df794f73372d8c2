//! Database maintenance for hierarchy closure tables.

use std::collections::HashMap;

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit::{self, AuditEvent};

use super::closure::{ancestor_chain, compute_family_closure};
use super::{HierarchyError, HierarchyFamily};

/// Load the family's `(node, parent)` map.
async fn load_parent_map(
    tx: &mut Transaction<'_, Postgres>,
    family: HierarchyFamily,
) -> sqlx::Result<HashMap<Uuid, Option<Uuid>>> {
    let rows: Vec<(Uuid, Option<Uuid>)> = sqlx::query_as(&format!(
        "SELECT id, parent_id FROM {}",
        family.node_table()
    ))
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Recompute one node's closure rows and level after a create or parent change.
///
/// Deletes the node's existing descendant-side closure rows, walks `parent_id`
/// pointers upward, bulk-inserts the chain and derives `level` from it, all in
/// one transaction, so readers never observe a half-rebuilt chain. Returns the
/// new level.
#[tracing::instrument(skip(pool))]
pub async fn recompute_node(
    pool: &PgPool,
    family: HierarchyFamily,
    node_id: Uuid,
) -> Result<i32, HierarchyError> {
    let mut tx = pool.begin().await?;

    let parents = load_parent_map(&mut tx, family).await?;
    if !parents.contains_key(&node_id) {
        return Err(HierarchyError::NodeNotFound);
    }
    let chain = ancestor_chain(&parents, node_id)?;
    let level = chain.len() as i32;

    sqlx::query(&format!(
        "DELETE FROM {} WHERE descendant_id = $1",
        family.closure_table()
    ))
    .bind(node_id)
    .execute(&mut *tx)
    .await?;

    let (ancestors, depths): (Vec<Uuid>, Vec<i32>) = chain.into_iter().unzip();
    if !ancestors.is_empty() {
        sqlx::query(&format!(
            r"
            INSERT INTO {} (ancestor_id, descendant_id, depth)
            SELECT ancestor, $2, depth
            FROM UNNEST($1::uuid[], $3::int[]) AS t(ancestor, depth)
            ",
            family.closure_table()
        ))
        .bind(&ancestors)
        .bind(node_id)
        .bind(&depths)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(&format!(
        "UPDATE {} SET level = $2, updated_at = NOW() WHERE id = $1",
        family.node_table()
    ))
    .bind(node_id)
    .bind(level)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(level)
}

/// Rebuild a whole family's closure table from scratch.
///
/// Truncates the closure table and recomputes every node's ancestor chain from
/// the `parent_id` pointers. Idempotent and safe to re-run; this is the
/// recovery path after suspected corruption. Returns the number of closure
/// rows written.
#[tracing::instrument(skip(pool))]
pub async fn rebuild(pool: &PgPool, family: HierarchyFamily) -> Result<u64, HierarchyError> {
    let mut tx = pool.begin().await?;

    let parents = load_parent_map(&mut tx, family).await?;
    let (rows, levels) = compute_family_closure(&parents)?;

    sqlx::query(&format!("TRUNCATE {}", family.closure_table()))
        .execute(&mut *tx)
        .await?;

    if !rows.is_empty() {
        let ancestors: Vec<Uuid> = rows.iter().map(|r| r.ancestor_id).collect();
        let descendants: Vec<Uuid> = rows.iter().map(|r| r.descendant_id).collect();
        let depths: Vec<i32> = rows.iter().map(|r| r.depth).collect();

        sqlx::query(&format!(
            r"
            INSERT INTO {} (ancestor_id, descendant_id, depth)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::int[])
            ",
            family.closure_table()
        ))
        .bind(&ancestors)
        .bind(&descendants)
        .bind(&depths)
        .execute(&mut *tx)
        .await?;
    }

    for (node, level) in &levels {
        sqlx::query(&format!(
            "UPDATE {} SET level = $2, updated_at = NOW() WHERE id = $1",
            family.node_table()
        ))
        .bind(node)
        .bind(level)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(family = %family, rows = rows.len(), "Hierarchy closure rebuilt");
    Ok(rows.len() as u64)
}

/// Delete a node and its entire descendant subtree.
///
/// Children are removed, not re-parented. Closure rows referencing the deleted
/// nodes cascade away with them. Returns the number of nodes deleted (including
/// the root of the subtree); 0 if the node did not exist.
#[tracing::instrument(skip(pool))]
pub async fn delete_subtree(
    pool: &PgPool,
    family: HierarchyFamily,
    node_id: Uuid,
    actor_id: Option<Uuid>,
    actor_name: Option<&str>,
) -> Result<u64, HierarchyError> {
    let mut tx = pool.begin().await?;

    let descendants: Vec<Uuid> = sqlx::query_scalar(&format!(
        "SELECT descendant_id FROM {} WHERE ancestor_id = $1",
        family.closure_table()
    ))
    .bind(node_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut doomed = descendants;
    doomed.push(node_id);

    let result = sqlx::query(&format!(
        "DELETE FROM {} WHERE id = ANY($1)",
        family.node_table()
    ))
    .bind(&doomed)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let deleted = result.rows_affected();
    if deleted > 0 {
        audit::record(
            pool,
            AuditEvent::new("hierarchy.node_deleted")
                .actor(actor_id, actor_name)
                .subject(family.as_str(), Some(node_id), None)
                .metadata(serde_json::json!({ "nodes_removed": deleted })),
        )
        .await;
    }

    Ok(deleted)
}

/// Ancestor ids of a node, nearest first.
pub async fn ancestors(
    pool: &PgPool,
    family: HierarchyFamily,
    node_id: Uuid,
) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar(&format!(
        r"
        SELECT ancestor_id
        FROM {}
        WHERE descendant_id = $1
        ORDER BY depth ASC
        ",
        family.closure_table()
    ))
    .bind(node_id)
    .fetch_all(pool)
    .await
}

/// Create a group node (user group or permission group family) and compute its
/// closure rows. Template nodes are created through the template module.
pub async fn create_group_node(
    pool: &PgPool,
    family: HierarchyFamily,
    slug: &str,
    name: &str,
    parent_id: Option<Uuid>,
) -> Result<Uuid, HierarchyError> {
    debug_assert!(!matches!(family, HierarchyFamily::Template));

    let id: Uuid = sqlx::query_scalar(&format!(
        r"
        INSERT INTO {} (slug, name, parent_id)
        VALUES ($1, $2, $3)
        RETURNING id
        ",
        family.node_table()
    ))
    .bind(slug)
    .bind(name)
    .bind(parent_id)
    .fetch_one(pool)
    .await?;

    recompute_node(pool, family, id).await?;
    Ok(id)
}

/// Move a node under a new parent (or to the root) and recompute its chain.
///
/// Descendants' chains run through this node, so each of them is recomputed as
/// well (collected from the closure table before the move).
pub async fn set_parent(
    pool: &PgPool,
    family: HierarchyFamily,
    node_id: Uuid,
    parent_id: Option<Uuid>,
) -> Result<i32, HierarchyError> {
    let descendants: Vec<Uuid> = sqlx::query_scalar(&format!(
        "SELECT descendant_id FROM {} WHERE ancestor_id = $1",
        family.closure_table()
    ))
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    let updated = sqlx::query(&format!(
        "UPDATE {} SET parent_id = $2, updated_at = NOW() WHERE id = $1",
        family.node_table()
    ))
    .bind(node_id)
    .bind(parent_id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(HierarchyError::NodeNotFound);
    }

    let level = recompute_node(pool, family, node_id).await?;
    for descendant in descendants {
        recompute_node(pool, family, descendant).await?;
    }
    Ok(level)
}

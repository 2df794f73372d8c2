//! Entity directory.
//!
//! Resolves `(kind, id)` pairs to human-readable names for scope labels and
//! audit snapshots. Each entity kind maps to a concrete table through
//! [`EntityKind::table_name`], a closed lookup rather than reflection.

use sqlx::PgPool;
use uuid::Uuid;

use crate::scope::EntityKind;

/// Display name for a scoped entity, if the row exists.
pub async fn display_name(
    pool: &PgPool,
    kind: EntityKind,
    entity_id: Uuid,
) -> sqlx::Result<Option<String>> {
    let table = kind.table_name();
    sqlx::query_scalar(&format!("SELECT name FROM {table} WHERE id = $1"))
        .bind(entity_id)
        .fetch_optional(pool)
        .await
}

/// Display name for a user, used when snapshotting audit actors and subjects.
pub async fn user_display_name(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar("SELECT display_name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

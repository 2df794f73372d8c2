//! Database queries for the audit trail.

use sqlx::PgPool;

use super::{AuditEvent, AuditLogEntry};

const AUDIT_COLUMNS: &str = "id, action, actor_id, actor_name, subject_type, subject_id, subject_name, source, source_id, metadata, ip_address, user_agent, created_at";

/// Persist one audit row, surfacing failure without propagating it.
///
/// The mutation being audited has already happened (or is about to commit);
/// losing the audit row is an operational problem, not a reason to roll the
/// mutation back. Failures land on the error channel instead.
pub async fn record(pool: &PgPool, event: AuditEvent) {
    if let Err(e) = record_strict(pool, &event).await {
        tracing::error!(
            action = %event.action,
            error = %e,
            "Audit write failed; event dropped"
        );
    }
}

/// Persist one audit row, returning the insert failure to the caller.
pub async fn record_strict(pool: &PgPool, event: &AuditEvent) -> sqlx::Result<AuditLogEntry> {
    sqlx::query_as::<_, AuditLogEntry>(&format!(
        r"
        INSERT INTO permission_audit_log
            (action, actor_id, actor_name, subject_type, subject_id, subject_name,
             source, source_id, metadata, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {AUDIT_COLUMNS}
        "
    ))
    .bind(&event.action)
    .bind(event.actor_id)
    .bind(&event.actor_name)
    .bind(&event.subject_type)
    .bind(event.subject_id)
    .bind(&event.subject_name)
    .bind(&event.source)
    .bind(event.source_id)
    .bind(&event.metadata)
    .bind(&event.ip_address)
    .bind(&event.user_agent)
    .fetch_one(pool)
    .await
}

/// Page through the audit log, newest first.
///
/// If `action_prefix` is provided, only entries whose action starts with that
/// prefix are returned (e.g. `delegation.` for the delegation lifecycle).
pub async fn list_audit_log(
    pool: &PgPool,
    limit: i64,
    offset: i64,
    action_prefix: Option<&str>,
) -> sqlx::Result<Vec<AuditLogEntry>> {
    if let Some(prefix) = action_prefix {
        let pattern = format!("{prefix}%");
        sqlx::query_as::<_, AuditLogEntry>(&format!(
            r"
            SELECT {AUDIT_COLUMNS}
            FROM permission_audit_log
            WHERE action LIKE $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "
        ))
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as::<_, AuditLogEntry>(&format!(
            r"
            SELECT {AUDIT_COLUMNS}
            FROM permission_audit_log
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}

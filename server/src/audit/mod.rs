//! Immutable audit trail.
//!
//! One append-only row per lifecycle event. Writers snapshot human-readable
//! names at call time; nothing here dereferences live foreign keys after the
//! insert, so the log stays readable after renames and deletions.
//!
//! A failed audit write must not fail the mutation it describes: [`record`]
//! reports the failure on the operational error channel and returns.

pub mod handlers;
pub mod queries;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub use queries::{list_audit_log, record, record_strict};

/// Persisted audit row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<Uuid>,
    pub subject_name: Option<String>,
    pub source: Option<String>,
    pub source_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Event under construction, filled by the writer before persisting.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<Uuid>,
    pub subject_name: Option<String>,
    pub source: Option<String>,
    pub source_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            actor_id: None,
            actor_name: None,
            subject_type: None,
            subject_id: None,
            subject_name: None,
            source: None,
            source_id: None,
            metadata: None,
            ip_address: None,
            user_agent: None,
        }
    }

    #[must_use]
    pub fn actor(mut self, id: Option<Uuid>, name: Option<&str>) -> Self {
        self.actor_id = id;
        self.actor_name = name.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn subject(mut self, kind: &str, id: Option<Uuid>, name: Option<&str>) -> Self {
        self.subject_type = Some(kind.to_string());
        self.subject_id = id;
        self.subject_name = name.map(ToString::to_string);
        self
    }

    /// Provenance of the event (e.g. the delegation or template that caused it).
    #[must_use]
    pub fn source(mut self, kind: &str, id: Option<Uuid>) -> Self {
        self.source = Some(kind.to_string());
        self.source_id = id;
        self
    }

    #[must_use]
    pub fn metadata(mut self, value: serde_json::Value) -> Self {
        self.metadata = Some(value);
        self
    }

    #[must_use]
    pub fn request_context(mut self, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip.map(ToString::to_string);
        self.user_agent = user_agent.map(ToString::to_string);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_fills_fields() {
        let actor = Uuid::new_v4();
        let subject = Uuid::new_v4();
        let event = AuditEvent::new("delegation.created")
            .actor(Some(actor), Some("Ana Prieto"))
            .subject("delegation", Some(subject), Some("orders.approve"))
            .source("delegation", Some(subject))
            .metadata(serde_json::json!({"depth": 1}))
            .request_context(Some("10.1.2.3"), Some("brigade-cli/1.0"));

        assert_eq!(event.action, "delegation.created");
        assert_eq!(event.actor_id, Some(actor));
        assert_eq!(event.actor_name.as_deref(), Some("Ana Prieto"));
        assert_eq!(event.subject_type.as_deref(), Some("delegation"));
        assert_eq!(event.subject_name.as_deref(), Some("orders.approve"));
        assert_eq!(event.source.as_deref(), Some("delegation"));
        assert_eq!(event.ip_address.as_deref(), Some("10.1.2.3"));
        assert_eq!(event.user_agent.as_deref(), Some("brigade-cli/1.0"));
    }

    #[test]
    fn test_builder_defaults_empty() {
        let event = AuditEvent::new("scope.deactivated");
        assert!(event.actor_id.is_none());
        assert!(event.subject_type.is_none());
        assert!(event.metadata.is_none());
    }
}

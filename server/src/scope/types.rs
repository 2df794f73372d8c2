//! Scope entity types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The closed set of entity families a scope can point at.
///
/// Adding a family means adding a variant here plus a directory table mapping;
/// there is no reflective resolution by type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Shop,
    Kitchen,
    Driver,
    Supervisor,
    Supplier,
}

impl EntityKind {
    pub const ALL: [Self; 5] = [
        Self::Shop,
        Self::Kitchen,
        Self::Driver,
        Self::Supervisor,
        Self::Supplier,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shop => "shop",
            Self::Kitchen => "kitchen",
            Self::Driver => "driver",
            Self::Supervisor => "supervisor",
            Self::Supplier => "supplier",
        }
    }

    /// Parse a kind from its wire form. Unknown kinds resolve to `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "shop" => Some(Self::Shop),
            "kitchen" => Some(Self::Kitchen),
            "driver" => Some(Self::Driver),
            "supervisor" => Some(Self::Supervisor),
            "supplier" => Some(Self::Supplier),
            _ => None,
        }
    }

    /// Directory table holding the entity rows for this kind.
    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Shop => "shops",
            Self::Kitchen => "kitchens",
            Self::Driver => "drivers",
            Self::Supervisor => "supervisors",
            Self::Supplier => "suppliers",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a concrete scoped entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    #[must_use]
    pub const fn new(kind: EntityKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    /// Stable `"type:id"` key for this entity.
    #[must_use]
    pub fn scope_key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.id)
    }

    /// Parse a `"type:id"` key. Unknown kinds or malformed ids yield `None`.
    #[must_use]
    pub fn parse_key(key: &str) -> Option<Self> {
        let (kind, id) = key.split_once(':')?;
        let kind = EntityKind::parse(kind)?;
        let id = Uuid::parse_str(id).ok()?;
        Some(Self { kind, id })
    }
}

/// Canonical scope row.
///
/// Exactly one scope exists per distinct entity; `scope_key` is derived from
/// `(entity_type, entity_id)` and never hand-written.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Scope {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub scope_key: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scope {
    /// The parsed entity kind, if the stored type string is recognized.
    #[must_use]
    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::parse(&self.entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("warehouse"), None);
        assert_eq!(EntityKind::parse(""), None);
    }

    #[test]
    fn test_scope_key_format() {
        let id = Uuid::new_v4();
        let entity = EntityRef::new(EntityKind::Kitchen, id);
        assert_eq!(entity.scope_key(), format!("kitchen:{id}"));
    }

    #[test]
    fn test_parse_key() {
        let id = Uuid::new_v4();
        let key = format!("driver:{id}");
        let parsed = EntityRef::parse_key(&key).expect("should parse");
        assert_eq!(parsed.kind, EntityKind::Driver);
        assert_eq!(parsed.id, id);

        assert!(EntityRef::parse_key("warehouse:not-real").is_none());
        assert!(EntityRef::parse_key(&format!("warehouse:{id}")).is_none());
        assert!(EntityRef::parse_key("driver:not-a-uuid").is_none());
        assert!(EntityRef::parse_key("driver").is_none());
    }
}

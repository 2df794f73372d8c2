//! Scope canonicalization.
//!
//! Turns heterogeneous scoped entities (shops, kitchens, drivers, supervisors,
//! suppliers) into one canonical `Scope` identity with a stable `"type:id"` key.
//! Grants, delegations and template assignments reference scopes, never the
//! entity tables directly.

pub mod handlers;
pub mod queries;
pub mod types;

use dashmap::DashMap;
use uuid::Uuid;

pub use queries::{deactivate, find_scope, resolve, resolve_key};
pub use types::{EntityKind, EntityRef, Scope};

/// Process-local scope lookup cache.
///
/// Entries are only evicted through [`ScopeCache::invalidate`], fired on
/// deactivation. Scope rows are effectively immutable otherwise.
#[derive(Debug, Default)]
pub struct ScopeCache {
    by_id: DashMap<Uuid, Scope>,
    by_key: DashMap<String, Scope>,
}

impl ScopeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_by_id(&self, id: Uuid) -> Option<Scope> {
        self.by_id.get(&id).map(|s| s.clone())
    }

    #[must_use]
    pub fn get_by_key(&self, key: &str) -> Option<Scope> {
        self.by_key.get(key).map(|s| s.clone())
    }

    pub fn insert(&self, scope: &Scope) {
        self.by_id.insert(scope.id, scope.clone());
        self.by_key.insert(scope.scope_key.clone(), scope.clone());
    }

    /// Drop a scope from both indexes.
    pub fn invalidate(&self, scope: &Scope) {
        self.by_id.remove(&scope.id);
        self.by_key.remove(&scope.scope_key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scope(key: &str) -> Scope {
        let entity = EntityRef::parse_key(key).unwrap();
        Scope {
            id: Uuid::new_v4(),
            entity_type: entity.kind.as_str().to_string(),
            entity_id: entity.id,
            scope_key: key.to_string(),
            display_name: None,
            is_active: true,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_cache_insert_and_lookup() {
        let cache = ScopeCache::new();
        let s = scope(&format!("shop:{}", Uuid::new_v4()));
        cache.insert(&s);

        assert_eq!(cache.get_by_id(s.id).unwrap().scope_key, s.scope_key);
        assert_eq!(cache.get_by_key(&s.scope_key).unwrap().id, s.id);
    }

    #[test]
    fn test_cache_invalidate_purges_both_indexes() {
        let cache = ScopeCache::new();
        let s = scope(&format!("kitchen:{}", Uuid::new_v4()));
        cache.insert(&s);
        cache.invalidate(&s);

        assert!(cache.get_by_id(s.id).is_none());
        assert!(cache.get_by_key(&s.scope_key).is_none());
        assert!(cache.is_empty());
    }
}

//! Resolution cache.
//!
//! Effective permission sets are cached per `(user, scope)`. Entries carry no
//! locking; staleness is bounded by explicit invalidation from every mutation
//! path plus a fixed TTL as a backstop.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct CachedEntry {
    slugs: BTreeSet<String>,
    cached_at: Instant,
}

/// Per-process cache of resolved permission sets.
#[derive(Debug)]
pub struct ResolutionCache {
    entries: DashMap<(Uuid, Option<Uuid>), CachedEntry>,
    ttl: Duration,
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResolutionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a live entry. Expired entries are dropped on access.
    #[must_use]
    pub fn get(&self, user_id: Uuid, scope_id: Option<Uuid>) -> Option<BTreeSet<String>> {
        let key = (user_id, scope_id);
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.cached_at.elapsed() <= self.ttl => {
                return Some(entry.slugs.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    pub fn insert(&self, user_id: Uuid, scope_id: Option<Uuid>, slugs: BTreeSet<String>) {
        self.entries.insert(
            (user_id, scope_id),
            CachedEntry {
                slugs,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop every cached set for one user, across all scopes.
    pub fn invalidate_user(&self, user_id: Uuid) {
        self.entries.retain(|(user, _), _| *user != user_id);
    }

    /// Drop cached sets for a batch of users (template resave, sync).
    pub fn invalidate_users(&self, user_ids: &[Uuid]) {
        if user_ids.is_empty() {
            return;
        }
        self.entries
            .retain(|(user, _), _| !user_ids.contains(user));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(slugs: &[&str]) -> BTreeSet<String> {
        slugs.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_insert_and_get() {
        let cache = ResolutionCache::default();
        let user = Uuid::new_v4();
        let scope = Some(Uuid::new_v4());

        cache.insert(user, scope, set(&["shops.read"]));

        assert_eq!(cache.get(user, scope), Some(set(&["shops.read"])));
        // global and scoped entries are distinct keys
        assert!(cache.get(user, None).is_none());
    }

    #[test]
    fn test_ttl_expiry_drops_entry() {
        let cache = ResolutionCache::new(Duration::ZERO);
        let user = Uuid::new_v4();

        cache.insert(user, None, set(&["shops.read"]));
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get(user, None).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_user_covers_all_scopes() {
        let cache = ResolutionCache::default();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let scope = Some(Uuid::new_v4());

        cache.insert(user, None, set(&["a.b"]));
        cache.insert(user, scope, set(&["a.b", "c.d"]));
        cache.insert(other, None, set(&["e.f"]));

        cache.invalidate_user(user);

        assert!(cache.get(user, None).is_none());
        assert!(cache.get(user, scope).is_none());
        assert_eq!(cache.get(other, None), Some(set(&["e.f"])));
    }

    #[test]
    fn test_invalidate_users_batch() {
        let cache = ResolutionCache::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        cache.insert(a, None, set(&["x.y"]));
        cache.insert(b, None, set(&["x.y"]));
        cache.insert(c, None, set(&["x.y"]));

        cache.invalidate_users(&[a, b]);

        assert!(cache.get(a, None).is_none());
        assert!(cache.get(b, None).is_none());
        assert!(cache.get(c, None).is_some());
    }
}

//! Wildcard pattern matching.
//!
//! Rules, applied in order:
//! 1. `*.*` matches every permission.
//! 2. A trailing `.*` matches slugs sharing the resource prefix (`shops.*`).
//! 3. A leading `*.` matches slugs sharing the action suffix (`*.read`).
//! 4. Anything else names a macro: an explicit slug list keyed by name, not
//!    derivable from the pattern string. Unknown macros match nothing.

use serde::{Deserialize, Serialize};

/// Classification of a pattern string, persisted alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// `*.*`: the whole catalog.
    Full,
    /// `resource.*`: every action on one resource.
    Resource,
    /// `*.action`: one action across every resource.
    Action,
    /// Named macro expanding to a fixed slug list.
    Macro,
}

impl PatternType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Resource => "resource",
            Self::Action => "action",
            Self::Macro => "macro",
        }
    }
}

/// Classify a pattern string by the matching rules.
#[must_use]
pub fn classify(pattern: &str) -> PatternType {
    if pattern == "*.*" {
        PatternType::Full
    } else if pattern.ends_with(".*") {
        PatternType::Resource
    } else if pattern.starts_with("*.") {
        PatternType::Action
    } else {
        PatternType::Macro
    }
}

/// Test one slug against a pattern without materializing the expansion.
///
/// This is the checker's hot path for template wildcards.
#[must_use]
pub fn matches_pattern(slug: &str, pattern: &str) -> bool {
    match classify(pattern) {
        PatternType::Full => true,
        PatternType::Resource => {
            let prefix = &pattern[..pattern.len() - 1]; // keep the dot: "shops."
            slug.starts_with(prefix)
        }
        PatternType::Action => {
            let suffix = &pattern[1..]; // keep the dot: ".read"
            slug.ends_with(suffix)
        }
        PatternType::Macro => macro_permissions(pattern).contains(&slug),
    }
}

/// Expansion list for a named macro. Unknown names expand to nothing.
///
/// The mapping is deliberately hard-coded: macros bundle operationally related
/// permissions that share no slug structure.
#[must_use]
pub fn macro_permissions(name: &str) -> &'static [&'static str] {
    match name {
        "shop_management" => &[
            "shops.view",
            "shops.update",
            "shops.staff_manage",
            "orders.view",
        ],
        "kitchen_operations" => &[
            "kitchens.view",
            "kitchens.menu_update",
            "orders.view",
            "orders.prepare",
        ],
        "driver_dispatch" => &[
            "deliveries.view",
            "deliveries.assign",
            "routes.view",
        ],
        "finance_review" => &[
            "payments.view",
            "payouts.view",
            "reports.view",
        ],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pattern_matches_everything() {
        for slug in ["shops.read", "orders.approve", "a.b"] {
            assert!(matches_pattern(slug, "*.*"), "{slug} should match *.*");
        }
    }

    #[test]
    fn test_resource_pattern_matches_prefix() {
        assert!(matches_pattern("shops.read", "shops.*"));
        assert!(matches_pattern("shops.update", "shops.*"));
        assert!(!matches_pattern("orders.read", "shops.*"));
        // prefix comparison includes the dot: no partial-resource matches
        assert!(!matches_pattern("shopsx.read", "shops.*"));
    }

    #[test]
    fn test_action_pattern_matches_suffix() {
        assert!(matches_pattern("shops.read", "*.read"));
        assert!(matches_pattern("orders.read", "*.read"));
        assert!(!matches_pattern("orders.approve", "*.read"));
        // suffix comparison includes the dot: no partial-action matches
        assert!(!matches_pattern("orders.unread", "*.read"));
    }

    #[test]
    fn test_macro_pattern_uses_explicit_list() {
        assert!(matches_pattern("shops.view", "shop_management"));
        assert!(matches_pattern("orders.view", "shop_management"));
        assert!(!matches_pattern("payments.view", "shop_management"));
    }

    #[test]
    fn test_unknown_macro_matches_nothing() {
        assert!(macro_permissions("warehouse_ops").is_empty());
        assert!(!matches_pattern("shops.view", "warehouse_ops"));
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(classify("*.*"), PatternType::Full);
        assert_eq!(classify("shops.*"), PatternType::Resource);
        assert_eq!(classify("*.read"), PatternType::Action);
        assert_eq!(classify("shop_management"), PatternType::Macro);
        // a pattern that is both prefix- and suffix-shaped resolves by rule order
        assert_eq!(classify("*.something.*"), PatternType::Resource);
    }
}

//! Permission slug identity.
//!
//! A slug is the stable identity of a permission: a dotted `resource.action`
//! pair such as `shops.read` or `orders.approve`. Grants and delegations key on
//! the slug string, not on a catalog row; a slug that never became a catalog
//! entry can still be granted and checked.

use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

static SLUG_REGEX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").expect("valid regex"));

/// A validated `resource.action` permission slug.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionSlug(String);

impl PermissionSlug {
    /// Parse and validate a slug string.
    pub fn parse(raw: &str) -> Result<Self, InvalidSlug> {
        let trimmed = raw.trim();
        if SLUG_REGEX.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidSlug(raw.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `resource` half of the slug.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(r, _)| r)
    }

    /// The `action` half of the slug.
    #[must_use]
    pub fn action(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, a)| a)
    }
}

impl fmt::Display for PermissionSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PermissionSlug {
    type Error = InvalidSlug;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PermissionSlug> for String {
    fn from(slug: PermissionSlug) -> Self {
        slug.0
    }
}

impl AsRef<str> for PermissionSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Rejected slug string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid permission slug: {0:?} (expected lowercase resource.action)")]
pub struct InvalidSlug(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_slugs() {
        for raw in ["shops.read", "orders.approve", "payments.large", "a.b", "route_1.view_all"] {
            let slug = PermissionSlug::parse(raw).expect("should parse");
            assert_eq!(slug.as_str(), raw);
        }
    }

    #[test]
    fn test_invalid_slugs() {
        for raw in ["", "shops", "shops.", ".read", "Shops.Read", "shops.read.extra", "sh ops.read", "*.read"] {
            assert!(PermissionSlug::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_trims_whitespace() {
        let slug = PermissionSlug::parse("  shops.read  ").expect("should parse");
        assert_eq!(slug.as_str(), "shops.read");
    }

    #[test]
    fn test_resource_action_split() {
        let slug = PermissionSlug::parse("orders.approve").unwrap();
        assert_eq!(slug.resource(), "orders");
        assert_eq!(slug.action(), "approve");
    }

    #[test]
    fn test_serde_round_trip() {
        let slug = PermissionSlug::parse("shops.read").unwrap();
        let json = serde_json::to_string(&slug).unwrap();
        assert_eq!(json, "\"shops.read\"");

        let back: PermissionSlug = serde_json::from_str(&json).unwrap();
        assert_eq!(back, slug);

        let bad: Result<PermissionSlug, _> = serde_json::from_str("\"not a slug\"");
        assert!(bad.is_err());
    }
}

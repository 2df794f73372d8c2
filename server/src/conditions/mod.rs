//! Contextual grant conditions.
//!
//! A grant may carry a set of predicates that must all hold at check time for
//! the grant to be effective. Conditions gate: a grant whose conditions fail
//! counts as not granted, it is not merely annotated.
//!
//! Evaluation is conservative: unrecognized condition types fail closed, as do
//! malformed condition values.

pub mod evaluator;
pub mod ip;

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde_json::Value;
use uuid::Uuid;

pub use evaluator::ConditionEvaluator;
pub use ip::ip_matches;

/// A stored predicate set, keyed by condition type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    entries: BTreeMap<String, Value>,
}

impl ConditionSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a stored `jsonb` value. Anything but an object (or null) is
    /// malformed and yields `None`; the caller fails closed on it.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::empty()),
            Value::Object(map) => Some(Self {
                entries: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.entries.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The principal's state as the evaluator sees it.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub totp_verified: bool,
    pub email_verified: bool,
    /// Free-form user attributes compared exactly by `user_attributes`.
    pub attributes: Value,
}

impl Principal {
    #[must_use]
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            totp_verified: false,
            email_verified: false,
            attributes: Value::Null,
        }
    }
}

/// Request-time context supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    /// Request payload; numeric threshold conditions read `amount` from it.
    pub payload: Value,
}

impl RequestContext {
    /// The numeric amount carried by the request, defaulting to 0 when absent.
    #[must_use]
    pub fn amount(&self) -> f64 {
        self.payload
            .get("amount")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_accepts_object_and_null() {
        assert!(ConditionSet::from_value(&Value::Null).unwrap().is_empty());

        let set = ConditionSet::from_value(&json!({"requires_2fa": true})).unwrap();
        assert!(!set.is_empty());
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(ConditionSet::from_value(&json!("requires_2fa")).is_none());
        assert!(ConditionSet::from_value(&json!([1, 2])).is_none());
        assert!(ConditionSet::from_value(&json!(42)).is_none());
    }

    #[test]
    fn test_amount_defaults_to_zero() {
        let ctx = RequestContext::default();
        assert!((ctx.amount() - 0.0).abs() < f64::EPSILON);

        let ctx = RequestContext {
            payload: json!({"amount": 1500}),
            ..Default::default()
        };
        assert!((ctx.amount() - 1500.0).abs() < f64::EPSILON);
    }
}

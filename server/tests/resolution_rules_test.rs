//! Resolution rule tests
//!
//! Exercises the store-free decision surface end to end: wildcard matching,
//! condition evaluation, closure computation and delegation chain arithmetic.

use std::collections::HashMap;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use brigade_server::conditions::{ConditionEvaluator, ConditionSet, Principal, RequestContext};
use brigade_server::delegation::{extend_chain, PermissionDelegation};
use brigade_server::hierarchy::{ancestor_chain, compute_family_closure};
use brigade_server::wildcard::{classify, matches_pattern, PatternType};

// ============================================================================
// Wildcard matching
// ============================================================================

#[test]
fn full_wildcard_matches_every_slug() {
    for slug in ["shops.read", "orders.approve", "payments.large", "x.y"] {
        assert!(matches_pattern(slug, "*.*"));
    }
}

#[test]
fn resource_wildcard_matches_prefix_only() {
    assert!(matches_pattern("shops.read", "shops.*"));
    assert!(matches_pattern("shops.staff_manage", "shops.*"));
    assert!(!matches_pattern("orders.read", "shops.*"));
    assert!(!matches_pattern("shopsmore.read", "shops.*"));
}

#[test]
fn action_wildcard_matches_suffix_only() {
    assert!(matches_pattern("shops.read", "*.read"));
    assert!(matches_pattern("orders.read", "*.read"));
    assert!(!matches_pattern("shops.write", "*.read"));
    assert!(!matches_pattern("shops.proofread", "*.read"));
}

#[test]
fn unknown_macro_expands_to_nothing() {
    assert_eq!(classify("mystery_bundle"), PatternType::Macro);
    assert!(!matches_pattern("shops.read", "mystery_bundle"));
}

// ============================================================================
// Conditions
// ============================================================================

#[test]
fn condition_and_semantics_hold_regardless_of_order() {
    let eval = ConditionEvaluator::new();
    let principal = Principal::new(Uuid::new_v4());
    // A Friday inside business hours.
    let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();

    let passing = ConditionSet::empty()
        .with("days", json!(["friday"]))
        .with("time_range", json!({"start": "09:00", "end": "17:00"}));
    assert!(eval.evaluate(&passing, &principal, None, now));

    // Adding one failing entry sinks the set, wherever it sits.
    let failing = passing.clone().with("requires_2fa", json!(true));
    assert!(!eval.evaluate(&failing, &principal, None, now));

    let failing_first = ConditionSet::empty()
        .with("requires_2fa", json!(true))
        .with("days", json!(["friday"]));
    assert!(!eval.evaluate(&failing_first, &principal, None, now));
}

#[test]
fn amount_gate_blocks_large_requests() {
    let eval = ConditionEvaluator::new();
    let principal = Principal::new(Uuid::new_v4());
    let gate = ConditionSet::empty().with("max_amount", json!(1000));

    let large = RequestContext {
        payload: json!({"amount": 1500}),
        ..Default::default()
    };
    let small = RequestContext {
        payload: json!({"amount": 500}),
        ..Default::default()
    };

    assert!(!eval.evaluate(&gate, &principal, Some(&large), Utc::now()));
    assert!(eval.evaluate(&gate, &principal, Some(&small), Utc::now()));
}

#[test]
fn unknown_condition_type_fails_closed() {
    let eval = ConditionEvaluator::new();
    let principal = Principal::new(Uuid::new_v4());
    let set = ConditionSet::empty().with("moon_phase", json!("waxing"));

    assert!(!eval.evaluate(&set, &principal, None, Utc::now()));
}

// ============================================================================
// Hierarchy closure
// ============================================================================

#[test]
fn levels_equal_ancestor_chain_length_and_no_self_ancestry() {
    let root = Uuid::new_v4();
    let mid = Uuid::new_v4();
    let leaf = Uuid::new_v4();
    let parents: HashMap<_, _> = [(root, None), (mid, Some(root)), (leaf, Some(mid))]
        .into_iter()
        .collect();

    let (rows, levels) = compute_family_closure(&parents).unwrap();

    for (&node, &level) in &levels {
        let chain = ancestor_chain(&parents, node).unwrap();
        assert_eq!(level as usize, chain.len());
    }
    assert!(rows.iter().all(|r| r.ancestor_id != r.descendant_id));
}

#[test]
fn corrupt_parent_graph_is_rejected_not_recursed() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let parents: HashMap<_, _> = [(a, Some(b)), (b, Some(a))].into_iter().collect();

    assert!(compute_family_closure(&parents).is_err());
}

// ============================================================================
// Delegation
// ============================================================================

fn delegation(valid_until: chrono::DateTime<Utc>) -> PermissionDelegation {
    let now = Utc::now();
    PermissionDelegation {
        id: Uuid::new_v4(),
        delegator_id: Uuid::new_v4(),
        delegatee_id: Uuid::new_v4(),
        permission_slug: "orders.approve".to_string(),
        scope_id: None,
        valid_from: now - Duration::minutes(5),
        valid_until,
        can_redelegate: true,
        max_redelegation_depth: 2,
        reason: Some("shift cover".to_string()),
        revoked_at: None,
        revoked_by: None,
        revoke_reason: None,
        created_at: now,
    }
}

#[test]
fn expiry_is_a_predicate_not_a_state() {
    let d = delegation(Utc::now() + Duration::hours(1));
    assert!(d.is_active(Utc::now()));
    // The same row reads as inactive once the window lapses.
    assert!(!d.is_active(Utc::now() + Duration::hours(2)));
}

#[test]
fn revoked_delegation_never_reactivates() {
    let mut d = delegation(Utc::now() + Duration::hours(1));
    d.revoked_at = Some(Utc::now());
    assert!(!d.is_active(Utc::now()));
}

#[test]
fn chain_depth_grows_from_the_root() {
    let root_delegation = Uuid::new_v4();
    let second = Uuid::new_v4();
    let third = Uuid::new_v4();

    let first_link = extend_chain(None, root_delegation, second);
    assert_eq!(first_link.depth, 1);
    assert_eq!(first_link.root_delegation_id, root_delegation);
    assert_eq!(first_link.path, vec![root_delegation, second]);

    // A chain row as the store would hold it for the second delegation.
    let stored = brigade_server::delegation::DelegationChain {
        id: Uuid::new_v4(),
        delegation_id: second,
        parent_delegation_id: root_delegation,
        root_delegation_id: first_link.root_delegation_id,
        depth: first_link.depth,
        chain_path: serde_json::json!(first_link
            .path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()),
        created_at: Utc::now(),
    };

    let second_link = extend_chain(Some(&stored), second, third);
    assert_eq!(second_link.depth, 2);
    assert_eq!(second_link.root_delegation_id, root_delegation);
    assert_eq!(second_link.path, vec![root_delegation, second, third]);
}

//! Condition evaluation.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde_json::Value;

use super::ip::ip_matches;
use super::{ConditionSet, Principal, RequestContext};

type CustomHook = dyn Fn(&Value, &Principal, Option<&RequestContext>) -> bool + Send + Sync;

/// Evaluates stored condition sets against a principal and request context.
///
/// All entries in a set are ANDed; an empty set always passes. The `custom`
/// condition type is an extension point: it passes unless a hook is installed.
#[derive(Default)]
pub struct ConditionEvaluator {
    custom_hook: Option<Box<CustomHook>>,
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionEvaluator")
            .field("custom_hook", &self.custom_hook.is_some())
            .finish()
    }
}

impl ConditionEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a hook for the `custom` condition type.
    #[must_use]
    pub fn with_custom_hook<F>(hook: F) -> Self
    where
        F: Fn(&Value, &Principal, Option<&RequestContext>) -> bool + Send + Sync + 'static,
    {
        Self {
            custom_hook: Some(Box::new(hook)),
        }
    }

    /// Evaluate a full condition set. Every entry must pass.
    #[must_use]
    pub fn evaluate(
        &self,
        set: &ConditionSet,
        principal: &Principal,
        ctx: Option<&RequestContext>,
        now: DateTime<Utc>,
    ) -> bool {
        set.iter()
            .all(|(key, value)| self.evaluate_entry(key, value, principal, ctx, now))
    }

    /// Evaluate a raw stored `jsonb` column. `None` means unconditioned;
    /// a malformed value fails closed.
    #[must_use]
    pub fn evaluate_stored(
        &self,
        stored: Option<&Value>,
        principal: &Principal,
        ctx: Option<&RequestContext>,
        now: DateTime<Utc>,
    ) -> bool {
        match stored {
            None => true,
            Some(value) => match ConditionSet::from_value(value) {
                Some(set) => self.evaluate(&set, principal, ctx, now),
                None => false,
            },
        }
    }

    fn evaluate_entry(
        &self,
        key: &str,
        value: &Value,
        principal: &Principal,
        ctx: Option<&RequestContext>,
        now: DateTime<Utc>,
    ) -> bool {
        match key {
            "time_range" => time_range_passes(value, now),
            "days" => days_passes(value, now),
            "date_range" => date_range_passes(value, now),
            "ip_whitelist" => ip_whitelist_passes(value, ctx),
            "ip_blacklist" => ip_blacklist_passes(value, ctx),
            "requires_2fa" => flag_passes(value, principal.totp_verified),
            "requires_email_verified" => flag_passes(value, principal.email_verified),
            "max_amount" => value
                .as_f64()
                .is_some_and(|max| request_amount(ctx) <= max),
            "min_amount" => value
                .as_f64()
                .is_some_and(|min| request_amount(ctx) >= min),
            "user_attributes" => attributes_pass(value, principal),
            "custom" => self
                .custom_hook
                .as_ref()
                .map_or(true, |hook| hook(value, principal, ctx)),
            // Unknown condition types fail closed.
            _ => false,
        }
    }
}

fn request_amount(ctx: Option<&RequestContext>) -> f64 {
    ctx.map_or(0.0, RequestContext::amount)
}

fn flag_passes(value: &Value, satisfied: bool) -> bool {
    match value.as_bool() {
        Some(required) => !required || satisfied,
        None => false,
    }
}

fn parse_time(value: Option<&Value>) -> Option<NaiveTime> {
    let raw = value?.as_str()?;
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn time_range_passes(value: &Value, now: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (parse_time(value.get("start")), parse_time(value.get("end")))
    else {
        return false;
    };

    let current = now.time();

    if start <= end {
        current >= start && current <= end
    } else {
        // Window wraps midnight (e.g. 22:00 - 06:00).
        current >= start || current <= end
    }
}

fn days_passes(value: &Value, now: DateTime<Utc>) -> bool {
    let Some(days) = value.as_array() else {
        return false;
    };
    let today = weekday_name(now);
    days.iter()
        .filter_map(Value::as_str)
        .any(|d| d.eq_ignore_ascii_case(today))
}

fn weekday_name(now: DateTime<Utc>) -> &'static str {
    match now.weekday() {
        chrono::Weekday::Mon => "monday",
        chrono::Weekday::Tue => "tuesday",
        chrono::Weekday::Wed => "wednesday",
        chrono::Weekday::Thu => "thursday",
        chrono::Weekday::Fri => "friday",
        chrono::Weekday::Sat => "saturday",
        chrono::Weekday::Sun => "sunday",
    }
}

fn parse_date(value: Option<&Value>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value?.as_str()?, "%Y-%m-%d").ok()
}

fn date_range_passes(value: &Value, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    let start = parse_date(value.get("start"));
    let end = parse_date(value.get("end"));

    if value.get("start").is_some() && start.is_none() {
        return false;
    }
    if value.get("end").is_some() && end.is_none() {
        return false;
    }

    // Bounds are inclusive; a missing bound leaves that side open.
    start.is_none_or(|s| today >= s) && end.is_none_or(|e| today <= e)
}

fn ip_whitelist_passes(value: &Value, ctx: Option<&RequestContext>) -> bool {
    // No request context means the caller cannot prove an allowed origin.
    let Some(ip) = ctx.and_then(|c| c.ip_address) else {
        return false;
    };
    let Some(patterns) = value.as_array() else {
        return false;
    };
    patterns
        .iter()
        .filter_map(Value::as_str)
        .any(|pattern| ip_matches(ip, pattern))
}

fn ip_blacklist_passes(value: &Value, ctx: Option<&RequestContext>) -> bool {
    // Without a request there is no address to be blacklisted.
    let Some(ip) = ctx.and_then(|c| c.ip_address) else {
        return true;
    };
    let Some(patterns) = value.as_array() else {
        return false;
    };
    !patterns
        .iter()
        .filter_map(Value::as_str)
        .any(|pattern| ip_matches(ip, pattern))
}

fn attributes_pass(value: &Value, principal: &Principal) -> bool {
    let Some(expected) = value.as_object() else {
        return false;
    };
    expected.iter().all(|(key, expected_value)| {
        principal
            .attributes
            .get(key)
            .is_some_and(|actual| actual == expected_value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    fn principal() -> Principal {
        Principal::new(Uuid::new_v4())
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn ctx_with_ip(ip: &str) -> RequestContext {
        RequestContext {
            ip_address: Some(ip.parse().unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_set_always_passes() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate(&ConditionSet::empty(), &principal(), None, Utc::now()));
    }

    #[test]
    fn test_all_entries_must_pass_regardless_of_order() {
        let eval = ConditionEvaluator::new();
        // 2026-08-07 is a Friday.
        let now = at(2026, 8, 7, 12, 0);

        let passing = ConditionSet::empty().with("days", json!(["friday"]));
        assert!(eval.evaluate(&passing, &principal(), None, now));

        let a_then_b = ConditionSet::empty()
            .with("days", json!(["friday"]))
            .with("requires_2fa", json!(true));
        let b_then_a = ConditionSet::empty()
            .with("requires_2fa", json!(true))
            .with("days", json!(["friday"]));

        // principal has no 2fa, so both orderings fail
        assert!(!eval.evaluate(&a_then_b, &principal(), None, now));
        assert!(!eval.evaluate(&b_then_a, &principal(), None, now));
    }

    #[test]
    fn test_unknown_condition_fails_closed() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty().with("lunar_phase", json!("full"));
        assert!(!eval.evaluate(&set, &principal(), None, Utc::now()));
    }

    #[test]
    fn test_time_range_window() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty()
            .with("time_range", json!({"start": "09:00", "end": "17:00"}));

        assert!(eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 12, 30)));
        assert!(eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 9, 0)));
        assert!(eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 17, 0)));
        assert!(!eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 17, 1)));
        assert!(!eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 3, 0)));
    }

    #[test]
    fn test_time_range_wrapping_midnight() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty()
            .with("time_range", json!({"start": "22:00", "end": "06:00"}));

        assert!(eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 23, 0)));
        assert!(eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 5, 0)));
        assert!(!eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 12, 0)));
    }

    #[test]
    fn test_days_case_insensitive() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty().with("days", json!(["Friday", "SATURDAY"]));

        assert!(eval.evaluate(&set, &principal(), None, at(2026, 8, 7, 12, 0))); // friday
        assert!(!eval.evaluate(&set, &principal(), None, at(2026, 8, 3, 12, 0))); // monday
    }

    #[test]
    fn test_date_range_inclusive() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty()
            .with("date_range", json!({"start": "2026-08-01", "end": "2026-08-31"}));

        assert!(eval.evaluate(&set, &principal(), None, at(2026, 8, 1, 0, 0)));
        assert!(eval.evaluate(&set, &principal(), None, at(2026, 8, 31, 23, 59)));
        assert!(!eval.evaluate(&set, &principal(), None, at(2026, 9, 1, 0, 0)));
    }

    #[test]
    fn test_ip_whitelist_requires_context() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty().with("ip_whitelist", json!(["10.0.0.0/8"]));

        assert!(!eval.evaluate(&set, &principal(), None, Utc::now()));
        assert!(eval.evaluate(&set, &principal(), Some(&ctx_with_ip("10.1.2.3")), Utc::now()));
        assert!(!eval.evaluate(&set, &principal(), Some(&ctx_with_ip("11.1.2.3")), Utc::now()));
    }

    #[test]
    fn test_ip_blacklist_passes_without_context() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty().with("ip_blacklist", json!(["10.0.0.0/8"]));

        assert!(eval.evaluate(&set, &principal(), None, Utc::now()));
        assert!(!eval.evaluate(&set, &principal(), Some(&ctx_with_ip("10.1.2.3")), Utc::now()));
        assert!(eval.evaluate(&set, &principal(), Some(&ctx_with_ip("11.1.2.3")), Utc::now()));
    }

    #[test]
    fn test_flag_conditions() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty().with("requires_2fa", json!(true));

        let mut p = principal();
        assert!(!eval.evaluate(&set, &p, None, Utc::now()));
        p.totp_verified = true;
        assert!(eval.evaluate(&set, &p, None, Utc::now()));

        // a false flag passes for everyone
        let relaxed = ConditionSet::empty().with("requires_2fa", json!(false));
        assert!(eval.evaluate(&relaxed, &principal(), None, Utc::now()));
    }

    #[test]
    fn test_amount_thresholds() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty().with("max_amount", json!(1000));

        let small = RequestContext {
            payload: json!({"amount": 500}),
            ..Default::default()
        };
        let large = RequestContext {
            payload: json!({"amount": 1500}),
            ..Default::default()
        };

        assert!(eval.evaluate(&set, &principal(), Some(&small), Utc::now()));
        assert!(!eval.evaluate(&set, &principal(), Some(&large), Utc::now()));
        // absent amount defaults to 0, within any max
        assert!(eval.evaluate(&set, &principal(), None, Utc::now()));

        let floor = ConditionSet::empty().with("min_amount", json!(100));
        assert!(eval.evaluate(&floor, &principal(), Some(&large), Utc::now()));
        assert!(!eval.evaluate(&floor, &principal(), None, Utc::now()));
    }

    #[test]
    fn test_user_attributes_exact_match() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty()
            .with("user_attributes", json!({"region": "north", "tier": 2}));

        let mut p = principal();
        p.attributes = json!({"region": "north", "tier": 2, "extra": true});
        assert!(eval.evaluate(&set, &p, None, Utc::now()));

        p.attributes = json!({"region": "north", "tier": 3});
        assert!(!eval.evaluate(&set, &p, None, Utc::now()));

        p.attributes = json!({"region": "north"});
        assert!(!eval.evaluate(&set, &p, None, Utc::now()));
    }

    #[test]
    fn test_custom_passes_without_hook() {
        let eval = ConditionEvaluator::new();
        let set = ConditionSet::empty().with("custom", json!({"anything": 1}));
        assert!(eval.evaluate(&set, &principal(), None, Utc::now()));
    }

    #[test]
    fn test_custom_hook_is_consulted() {
        let eval = ConditionEvaluator::with_custom_hook(|value, _, _| {
            value.get("allow").and_then(Value::as_bool).unwrap_or(false)
        });

        let allowed = ConditionSet::empty().with("custom", json!({"allow": true}));
        let denied = ConditionSet::empty().with("custom", json!({"allow": false}));

        assert!(eval.evaluate(&allowed, &principal(), None, Utc::now()));
        assert!(!eval.evaluate(&denied, &principal(), None, Utc::now()));
    }

    #[test]
    fn test_evaluate_stored_fails_closed_on_malformed() {
        let eval = ConditionEvaluator::new();
        let p = principal();

        assert!(eval.evaluate_stored(None, &p, None, Utc::now()));
        assert!(eval.evaluate_stored(Some(&Value::Null), &p, None, Utc::now()));
        assert!(!eval.evaluate_stored(Some(&json!("bogus")), &p, None, Utc::now()));
        assert!(!eval.evaluate_stored(Some(&json!(["bogus"])), &p, None, Utc::now()));
    }
}

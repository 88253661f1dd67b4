//! FSM guard conditions (§3 "Condition (FSM guard)", §4.4): the recursive sum type evaluated
//! against shared state, event tags, and the event timestamp to decide whether an `fsm` picker
//! should transition.

use crate::model::Tags;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Once;
use tracing::warn;

/// A `before`/`after` temporal guard: only the components given are compared, replaced onto the
/// event timestamp before the comparison (§4.4 "normalise ... with `replace()`").
#[derive(Clone, Debug, Deserialize, Default)]
pub struct TemporalSpec {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub second: Option<u32>,
    pub microsecond: Option<u32>,
}

impl TemporalSpec {
    fn replace_onto(&self, base: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut dt = base;
        if let Some(y) = self.year {
            dt = dt.with_year(y)?;
        }
        if let Some(m) = self.month {
            dt = dt.with_month(m)?;
        }
        if let Some(d) = self.day {
            dt = dt.with_day(d)?;
        }
        if let Some(h) = self.hour {
            dt = dt.with_hour(h)?;
        }
        if let Some(m) = self.minute {
            dt = dt.with_minute(m)?;
        }
        if let Some(s) = self.second {
            dt = dt.with_second(s)?;
        }
        if let Some(us) = self.microsecond {
            dt = dt.with_nanosecond(us * 1000)?;
        }
        Some(dt)
    }
}

/// A single field/value comparison against shared state.
#[derive(Clone, Debug, Deserialize)]
pub struct FieldValue {
    pub state_field: String,
    pub value: Value,
}

/// Tags a `has_tags` check accepts: either a single tag or a list.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TagSet {
    One(String),
    Many(Vec<String>),
}

impl TagSet {
    fn as_slice(&self) -> Vec<&str> {
        match self {
            TagSet::One(s) => vec![s.as_str()],
            TagSet::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// The recursive FSM condition sum type (§3).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Eq(FieldValue),
    Gt(FieldValue),
    Ge(FieldValue),
    Lt(FieldValue),
    Le(FieldValue),
    Matches(FieldValue),
    In(FieldValue),
    LenEq(FieldValue),
    LenGt(FieldValue),
    LenGe(FieldValue),
    LenLt(FieldValue),
    LenLe(FieldValue),
    Before(TemporalSpec),
    After(TemporalSpec),
    HasTags(TagSet),
    Defined(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

fn warn_once_missing_field(field: &str) {
    static WARN: Once = Once::new();
    WARN.call_once(|| {
        warn!(field, "condition referenced a missing state field; evaluating as false");
    });
}

fn warn_once_type_mismatch(op: &str) {
    static WARN: Once = Once::new();
    WARN.call_once(|| {
        warn!(op, "condition comparison failed with a type mismatch; evaluating as false");
    });
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn numeric_cmp(state: &Value, target: &Value, op: &str, f: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match (as_f64(state), as_f64(target)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).is_some_and(&f),
        _ => {
            warn_once_type_mismatch(op);
            false
        }
    }
}

fn len_of(v: &Value) -> Option<usize> {
    match v {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        Value::Object(o) => Some(o.len()),
        _ => None,
    }
}

/// Evaluation context: shared state snapshot, the current event's tags, and its timestamp.
pub struct ConditionContext<'a> {
    pub shared: &'a std::collections::HashMap<String, Value>,
    pub tags: &'a Tags,
    pub timestamp: NaiveDateTime,
}

impl Condition {
    /// Evaluates this condition against `ctx`. Missing fields and type mismatches both compare
    /// as `false` (with a once-logged warning), per §4.4.
    pub fn evaluate(&self, ctx: &ConditionContext<'_>) -> bool {
        match self {
            Condition::Eq(fv) => self.field_cmp(fv, ctx, |a, b| a == b),
            Condition::Gt(fv) => self.numeric(fv, ctx, "gt", |o| o == std::cmp::Ordering::Greater),
            Condition::Ge(fv) => self.numeric(fv, ctx, "ge", |o| o != std::cmp::Ordering::Less),
            Condition::Lt(fv) => self.numeric(fv, ctx, "lt", |o| o == std::cmp::Ordering::Less),
            Condition::Le(fv) => self.numeric(fv, ctx, "le", |o| o != std::cmp::Ordering::Greater),
            Condition::Matches(fv) => self.matches(fv, ctx),
            Condition::In(fv) => self.is_in(fv, ctx),
            Condition::LenEq(fv) => self.len_cmp(fv, ctx, "len_eq", |o| o == std::cmp::Ordering::Equal),
            Condition::LenGt(fv) => self.len_cmp(fv, ctx, "len_gt", |o| o == std::cmp::Ordering::Greater),
            Condition::LenGe(fv) => self.len_cmp(fv, ctx, "len_ge", |o| o != std::cmp::Ordering::Less),
            Condition::LenLt(fv) => self.len_cmp(fv, ctx, "len_lt", |o| o == std::cmp::Ordering::Less),
            Condition::LenLe(fv) => self.len_cmp(fv, ctx, "len_le", |o| o != std::cmp::Ordering::Greater),
            Condition::Before(spec) => self.temporal(spec, ctx, |now, bound| now < bound),
            Condition::After(spec) => self.temporal(spec, ctx, |now, bound| now > bound),
            Condition::HasTags(set) => {
                let wanted = set.as_slice();
                wanted.iter().all(|w| ctx.tags.iter().any(|t| t == w))
            }
            Condition::Defined(field) => !matches!(
                ctx.shared.get(field).unwrap_or(&Value::Null),
                Value::Null
            ),
            Condition::And(conds) => conds.iter().all(|c| c.evaluate(ctx)),
            Condition::Or(conds) => conds.iter().any(|c| c.evaluate(ctx)),
            Condition::Not(c) => !c.evaluate(ctx),
        }
    }

    fn lookup<'a>(&self, field: &str, ctx: &'a ConditionContext<'_>) -> Option<&'a Value> {
        let v = ctx.shared.get(field);
        if v.is_none() {
            warn_once_missing_field(field);
        }
        v
    }

    fn field_cmp(
        &self,
        fv: &FieldValue,
        ctx: &ConditionContext<'_>,
        f: impl Fn(&Value, &Value) -> bool,
    ) -> bool {
        match self.lookup(&fv.state_field, ctx) {
            Some(actual) => f(actual, &fv.value),
            None => false,
        }
    }

    fn numeric(
        &self,
        fv: &FieldValue,
        ctx: &ConditionContext<'_>,
        op: &str,
        f: impl Fn(std::cmp::Ordering) -> bool,
    ) -> bool {
        match self.lookup(&fv.state_field, ctx) {
            Some(actual) => numeric_cmp(actual, &fv.value, op, f),
            None => false,
        }
    }

    fn len_cmp(
        &self,
        fv: &FieldValue,
        ctx: &ConditionContext<'_>,
        op: &str,
        f: impl Fn(std::cmp::Ordering) -> bool,
    ) -> bool {
        let target = match fv.value.as_u64() {
            Some(n) => n as usize,
            None => {
                warn_once_type_mismatch(op);
                return false;
            }
        };
        match self.lookup(&fv.state_field, ctx).and_then(len_of) {
            Some(actual) => f(actual.cmp(&target)),
            None => false,
        }
    }

    fn matches(&self, fv: &FieldValue, ctx: &ConditionContext<'_>) -> bool {
        let pattern = match fv.value.as_str() {
            Some(p) => p,
            None => {
                warn_once_type_mismatch("matches");
                return false;
            }
        };
        let actual = match self.lookup(&fv.state_field, ctx).and_then(Value::as_str) {
            Some(s) => s,
            None => return false,
        };
        match regex::Regex::new(pattern) {
            Ok(re) => re.is_match(actual),
            Err(_) => {
                warn_once_type_mismatch("matches");
                false
            }
        }
    }

    fn is_in(&self, fv: &FieldValue, ctx: &ConditionContext<'_>) -> bool {
        let haystack = match fv.value.as_array() {
            Some(a) => a,
            None => {
                warn_once_type_mismatch("in");
                return false;
            }
        };
        match self.lookup(&fv.state_field, ctx) {
            Some(actual) => haystack.iter().any(|v| v == actual),
            None => false,
        }
    }

    fn temporal(
        &self,
        spec: &TemporalSpec,
        ctx: &ConditionContext<'_>,
        f: impl Fn(NaiveDateTime, NaiveDateTime) -> bool,
    ) -> bool {
        match spec.replace_onto(ctx.timestamp) {
            Some(bound) => f(ctx.timestamp, bound),
            None => {
                warn_once_type_mismatch("temporal");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx(shared: HashMap<String, Value>, tags: Vec<String>) -> ConditionContext<'static> {
        // Leak is fine in tests; context borrows must outlive the call.
        let shared: &'static HashMap<String, Value> = Box::leak(Box::new(shared));
        let tags: &'static Tags = Box::leak(Box::new(Arc::new(tags)));
        ConditionContext {
            shared,
            tags,
            timestamp: NaiveDateTime::parse_from_str("2024-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap(),
        }
    }

    #[test]
    fn gt_transitions_after_threshold() {
        let cond = Condition::Gt(FieldValue {
            state_field: "counter".into(),
            value: Value::from(5),
        });
        for i in 0..10 {
            let mut shared = HashMap::new();
            shared.insert("counter".to_string(), Value::from(i));
            let c = ctx(shared, vec![]);
            assert_eq!(cond.evaluate(&c), i > 5, "counter={i}");
        }
    }

    #[test]
    fn missing_field_is_false() {
        let cond = Condition::Eq(FieldValue {
            state_field: "missing".into(),
            value: Value::from(1),
        });
        let c = ctx(HashMap::new(), vec![]);
        assert!(!cond.evaluate(&c));
    }

    #[test]
    fn type_mismatch_is_false() {
        let cond = Condition::Gt(FieldValue {
            state_field: "s".into(),
            value: Value::from(1),
        });
        let mut shared = HashMap::new();
        shared.insert("s".to_string(), Value::String("not a number".into()));
        let c = ctx(shared, vec![]);
        assert!(!cond.evaluate(&c));
    }

    #[test]
    fn has_tags_requires_subset() {
        let cond = Condition::HasTags(TagSet::Many(vec!["a".into(), "b".into()]));
        assert!(cond.evaluate(&ctx(HashMap::new(), vec!["a".into(), "b".into(), "c".into()])));
        assert!(!cond.evaluate(&ctx(HashMap::new(), vec!["a".into()])));
    }

    #[test]
    fn and_or_not_compose() {
        let mut shared = HashMap::new();
        shared.insert("x".to_string(), Value::from(10));
        let c = ctx(shared, vec![]);
        let gt5 = Condition::Gt(FieldValue { state_field: "x".into(), value: Value::from(5) });
        let lt5 = Condition::Lt(FieldValue { state_field: "x".into(), value: Value::from(5) });
        assert!(Condition::And(vec![gt5.clone(), Condition::Not(Box::new(lt5.clone()))]).evaluate(&c));
        assert!(Condition::Or(vec![lt5, gt5]).evaluate(&c));
    }
}

//! Typed comparison operators applied to a resolved user value and a condition target.
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    VersionGt,
    VersionGte,
    VersionLt,
    VersionLte,
    VersionEq,
    VersionNeq,
    Any,
    None,
    StrStartsWithAny,
    StrEndsWithAny,
    StrContainsAny,
    StrContainsNone,
    AnyCaseSensitive,
    NoneCaseSensitive,
    StrMatches,
    Before,
    After,
    On,
    Eq,
    Neq,
}

impl ConditionOperator {
    /// Parse an operator name. Returns `None` for operators this engine doesn't implement
    /// (including segment list operators), which callers must report as unsupported.
    pub fn parse(operator: &str) -> Option<ConditionOperator> {
        use ConditionOperator::*;
        Some(match operator.to_lowercase().as_str() {
            "gt" => Gt,
            "gte" => Gte,
            "lt" => Lt,
            "lte" => Lte,
            "version_gt" => VersionGt,
            "version_gte" => VersionGte,
            "version_lt" => VersionLt,
            "version_lte" => VersionLte,
            "version_eq" => VersionEq,
            "version_neq" => VersionNeq,
            "any" => Any,
            "none" => None,
            "str_starts_with_any" => StrStartsWithAny,
            "str_ends_with_any" => StrEndsWithAny,
            "str_contains_any" => StrContainsAny,
            "str_contains_none" => StrContainsNone,
            "any_case_sensitive" => AnyCaseSensitive,
            "none_case_sensitive" => NoneCaseSensitive,
            "str_matches" => StrMatches,
            "before" => Before,
            "after" => After,
            "on" => On,
            "eq" => Eq,
            "neq" => Neq,
            _ => return Option::None,
        })
    }

    /// Applying the operator to the values. Returns `false` if the operator cannot be applied
    /// (missing value, wrong type, invalid regex).
    pub fn eval(&self, value: Option<&Value>, target: Option<&Value>) -> bool {
        self.try_eval(value, target).unwrap_or(false)
    }

    /// Try applying the operator to the values, returning `None` if it cannot be applied.
    fn try_eval(&self, value: Option<&Value>, target: Option<&Value>) -> Option<bool> {
        use ConditionOperator::*;
        match self {
            Gt | Gte | Lt | Lte => {
                let left = as_f64(value?)?;
                let right = as_f64(target?)?;
                Some(match self {
                    Gt => left > right,
                    Gte => left >= right,
                    Lt => left < right,
                    _ => left <= right,
                })
            }

            VersionGt | VersionGte | VersionLt | VersionLte | VersionEq | VersionNeq => {
                let left = as_string(value?)?;
                let right = as_string(target?)?;
                let ordering = compare_versions(&left, &right);
                Some(match self {
                    VersionGt => ordering == Ordering::Greater,
                    VersionGte => ordering != Ordering::Less,
                    VersionLt => ordering == Ordering::Less,
                    VersionLte => ordering != Ordering::Greater,
                    VersionEq => ordering == Ordering::Equal,
                    _ => ordering != Ordering::Equal,
                })
            }

            Any | None | StrStartsWithAny | StrEndsWithAny | StrContainsAny | StrContainsNone
            | AnyCaseSensitive | NoneCaseSensitive => {
                let ignore_case = !matches!(self, AnyCaseSensitive | NoneCaseSensitive);
                let found = match (value.and_then(as_string), target) {
                    (Some(value), Some(Value::Array(candidates))) => {
                        let left = if ignore_case { value.to_lowercase() } else { value };
                        candidates.iter().filter_map(as_string).any(|candidate| {
                            let right = if ignore_case {
                                candidate.to_lowercase()
                            } else {
                                candidate
                            };
                            match self {
                                StrStartsWithAny => left.starts_with(&right),
                                StrEndsWithAny => left.ends_with(&right),
                                StrContainsAny | StrContainsNone => left.contains(&right),
                                _ => left == right,
                            }
                        })
                    }
                    _ => false,
                };
                let negated = matches!(self, None | NoneCaseSensitive | StrContainsNone);
                Some(found != negated)
            }

            StrMatches => {
                let value = as_string(value?)?;
                let pattern = as_string(target?)?;
                let regex = Regex::new(&pattern).ok()?;
                Some(regex.is_match(&value))
            }

            Before | After | On => {
                let left = as_f64(value?)?;
                let right = as_f64(target?)?;
                Some(match self {
                    Before => left < right,
                    After => left > right,
                    _ => utc_day(left)? == utc_day(right)?,
                })
            }

            Eq | Neq => {
                let equal = json_equals(value, target);
                Some(if *self == Eq { equal } else { !equal })
            }
        }
    }
}

/// Numeric view of a value. Numeric strings are accepted.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String view of a value. Numbers and booleans are rendered.
pub(crate) fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Compare dot-separated versions numerically, component by component. Anything after the first
/// `-` is ignored; missing or non-numeric components count as zero.
pub(crate) fn compare_versions(left: &str, right: &str) -> Ordering {
    fn parts(version: &str) -> Vec<u64> {
        let core = version.split('-').next().unwrap_or_default();
        core.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    }
    let left = parts(left);
    let right = parts(right);
    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn utc_day(millis: f64) -> Option<chrono::NaiveDate> {
    let datetime: DateTime<Utc> = DateTime::from_timestamp_millis(millis as i64)?;
    Some(datetime.date_naive())
}

fn json_equals(left: Option<&Value>, right: Option<&Value>) -> bool {
    let left = left.filter(|v| !v.is_null());
    let right = right.filter(|v| !v.is_null());
    match (left, right) {
        (None, None) => true,
        (Some(Value::Number(l)), Some(Value::Number(r))) => l.as_f64() == r.as_f64(),
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ConditionOperator::{self, *};
    use super::compare_versions;

    fn eval(op: ConditionOperator, value: serde_json::Value, target: serde_json::Value) -> bool {
        op.eval(Some(&value), Some(&target))
    }

    #[test]
    fn numeric() {
        assert!(eval(Gt, json!(19), json!(18)));
        assert!(!eval(Gt, json!(18), json!(18)));
        assert!(eval(Gte, json!("18"), json!(18)));
        assert!(eval(Lt, json!(17.5), json!(18)));
        assert!(eval(Lte, json!(18), json!("18.0")));
        assert!(!eval(Gt, json!("abc"), json!(1)));
        assert!(!Gt.eval(Option::None, Some(&json!(1))));
    }

    #[test]
    fn versions() {
        assert!(eval(VersionGt, json!("1.10.0"), json!("1.2.0")));
        assert!(eval(VersionLt, json!("1.2"), json!("1.2.1")));
        assert!(eval(VersionEq, json!("1.2.0"), json!("1.2")));
        assert!(eval(VersionEq, json!("2.0.0-beta"), json!("2.0.0")));
        assert!(eval(VersionNeq, json!("2.0.1"), json!("2.0.0")));
        assert!(eval(VersionGte, json!("3.0"), json!("3.0.0")));
        assert!(eval(VersionLte, json!("0.9.9"), json!("1.0.0")));
        assert!(!eval(VersionGt, json!(null), json!("1.0")));
    }

    #[test]
    fn version_components_default_to_zero() {
        use std::cmp::Ordering;
        assert_eq!(compare_versions("1.x.3", "1.0.3"), Ordering::Equal);
        assert_eq!(compare_versions("1", "1.0.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.1-rc.5", "1.0.0"), Ordering::Greater);
    }

    #[test]
    fn string_sets() {
        let targets = json!(["Alice", "bob"]);
        assert!(eval(Any, json!("alice"), targets.clone()));
        assert!(!eval(None, json!("ALICE"), targets.clone()));
        assert!(eval(None, json!("carol"), targets.clone()));
        assert!(!eval(AnyCaseSensitive, json!("alice"), targets.clone()));
        assert!(eval(AnyCaseSensitive, json!("Alice"), targets.clone()));
        assert!(eval(NoneCaseSensitive, json!("alice"), targets));
    }

    #[test]
    fn string_sets_render_numbers() {
        assert!(eval(Any, json!(42), json!(["42", "43"])));
        assert!(eval(Any, json!("42"), json!([42])));
    }

    #[test]
    fn missing_value_for_none_operator_passes() {
        assert!(None.eval(Option::None, Some(&json!(["a"]))));
        assert!(!Any.eval(Option::None, Some(&json!(["a"]))));
    }

    #[test]
    fn substring_operators() {
        let targets = json!(["foo", "BAR"]);
        assert!(eval(StrStartsWithAny, json!("Foobar"), targets.clone()));
        assert!(eval(StrEndsWithAny, json!("xbar"), targets.clone()));
        assert!(eval(StrContainsAny, json!("xxBaRxx"), targets.clone()));
        assert!(eval(StrContainsNone, json!("nothing"), targets.clone()));
        assert!(!eval(StrContainsNone, json!("xfoox"), targets));
    }

    #[test]
    fn regex() {
        assert!(eval(StrMatches, json!("test@example.com"), json!("^test.*")));
        assert!(!eval(StrMatches, json!("example@test.com"), json!("^test.*")));
        assert!(!eval(StrMatches, json!("anything"), json!("(unclosed")));
    }

    #[test]
    fn time() {
        let noon = 1_700_000_000_000i64;
        assert!(eval(Before, json!(noon), json!(noon + 1)));
        assert!(eval(After, json!(noon + 1), json!(noon)));
        assert!(eval(On, json!(noon), json!(noon + 60_000)));
        assert!(!eval(On, json!(noon), json!(noon + 86_400_000)));
    }

    #[test]
    fn equality() {
        assert!(eval(Eq, json!(1), json!(1.0)));
        assert!(eval(Eq, json!("a"), json!("a")));
        assert!(!eval(Eq, json!("a"), json!("A")));
        assert!(eval(Neq, json!(true), json!(false)));
        assert!(Eq.eval(Option::None, Option::None));
        assert!(Eq.eval(Option::None, Some(&json!(null))));
    }

    #[test]
    fn unknown_operators() {
        assert!(ConditionOperator::parse("in_segment_list").is_none());
        assert!(ConditionOperator::parse("not_in_segment_list").is_none());
        assert!(ConditionOperator::parse("made_up").is_none());
        assert_eq!(ConditionOperator::parse("VERSION_GT"), Some(VersionGt));
    }
}

//! Typed access to JSON config values.
use serde_json::{Map, Value};

/// A type that can be read out of a config, experiment, layer or parameter store.
///
/// Reading performs an explicit variant match and yields `None` on mismatch, so callers always
/// fall back to their default instead of failing.
pub trait ConfigValue: Sized {
    /// Parameter store `param_type` this Rust type corresponds to.
    const PARAM_TYPE: &'static str;

    fn from_json(value: &Value) -> Option<Self>;
}

impl ConfigValue for bool {
    const PARAM_TYPE: &'static str = "boolean";

    fn from_json(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl ConfigValue for i64 {
    const PARAM_TYPE: &'static str = "number";

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                let f = n.as_f64()?;
                (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
            }),
            _ => None,
        }
    }
}

impl ConfigValue for f64 {
    const PARAM_TYPE: &'static str = "number";

    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl ConfigValue for String {
    const PARAM_TYPE: &'static str = "string";

    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl ConfigValue for Vec<Value> {
    const PARAM_TYPE: &'static str = "array";

    fn from_json(value: &Value) -> Option<Self> {
        value.as_array().cloned()
    }
}

impl ConfigValue for Map<String, Value> {
    const PARAM_TYPE: &'static str = "object";

    fn from_json(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}

/// Look up `key` in `values`, returning `None` if it is missing or has a different type.
pub(crate) fn get_typed<T: ConfigValue>(
    values: &Map<String, Value>,
    key: &str,
    owner: &str,
) -> Option<T> {
    let Some(raw) = values.get(key) else {
        log::debug!(target: "statsig", key, owner; "key does not exist, returning the default value");
        return None;
    };
    let typed = T::from_json(raw);
    if typed.is_none() {
        log::warn!(target: "statsig", key, owner, requested = T::PARAM_TYPE;
            "value exists but requested type was incorrect, returning the default value");
    }
    typed
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn values() -> Map<String, Value> {
        json!({
            "flag": true, "count": 3, "ratio": 0.5, "whole": 4.0, "name": "x",
            "list": [1, 2], "obj": {"a": 1}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn reads_matching_types() {
        let v = values();
        assert_eq!(get_typed::<bool>(&v, "flag", "c"), Some(true));
        assert_eq!(get_typed::<i64>(&v, "count", "c"), Some(3));
        assert_eq!(get_typed::<i64>(&v, "whole", "c"), Some(4));
        assert_eq!(get_typed::<f64>(&v, "ratio", "c"), Some(0.5));
        assert_eq!(get_typed::<f64>(&v, "count", "c"), Some(3.0));
        assert_eq!(get_typed::<String>(&v, "name", "c").as_deref(), Some("x"));
        assert_eq!(get_typed::<Vec<Value>>(&v, "list", "c"), Some(vec![json!(1), json!(2)]));
        assert!(get_typed::<Map<String, Value>>(&v, "obj", "c").is_some());
    }

    #[test]
    fn mismatches_and_missing_keys_are_none() {
        let v = values();
        assert_eq!(get_typed::<bool>(&v, "name", "c"), None);
        assert_eq!(get_typed::<i64>(&v, "ratio", "c"), None);
        assert_eq!(get_typed::<String>(&v, "count", "c"), None);
        assert_eq!(get_typed::<String>(&v, "missing", "c"), None);
    }
}

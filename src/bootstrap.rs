//! Validation of bootstrap values against the user they are applied to.
use serde_json::{Map, Value};

use crate::{user::STABLE_ID_KEY, StatsigUser};

/// Whether bootstrap values computed for `evaluated_keys` can be used for `user`.
///
/// Only `userID` and `customIDs` (minus `stableID`) are compared. Values without
/// `evaluated_keys` are always accepted.
pub(crate) fn is_valid(user: &StatsigUser, evaluated_keys: Option<&Map<String, Value>>) -> bool {
    let Some(evaluated_keys) = evaluated_keys else {
        return true;
    };
    let user_json = user.to_json(false);
    let user_keys = id_fields(user_json.as_object());
    let evaluated_keys = id_fields(Some(evaluated_keys));
    contains(&evaluated_keys, &user_keys) && contains(&user_keys, &evaluated_keys)
}

fn id_fields(object: Option<&Map<String, Value>>) -> Map<String, Value> {
    let mut copy = Map::new();
    let Some(object) = object else {
        return copy;
    };
    if let Some(user_id) = object.get("userID").filter(|id| !id.is_null()) {
        copy.insert("userID".to_owned(), user_id.clone());
    }
    if let Some(Value::Object(custom_ids)) = object.get("customIDs") {
        let mut custom_ids = custom_ids.clone();
        custom_ids.remove(STABLE_ID_KEY);
        if !custom_ids.is_empty() {
            copy.insert("customIDs".to_owned(), Value::Object(custom_ids));
        }
    }
    copy
}

/// Every key of `one` is present in `two` with an equal value.
fn contains(one: &Map<String, Value>, two: &Map<String, Value>) -> bool {
    one.iter().all(|(key, value)| match (value, two.get(key)) {
        (Value::Object(inner), Some(Value::Object(other))) => contains(inner, other),
        (value, Some(other)) => value == other,
        (_, None) => false,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn keys(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_evaluated_keys_are_valid() {
        assert!(is_valid(&StatsigUser::with_user_id("a"), None));
    }

    #[test]
    fn matching_ids_are_valid() {
        let user = StatsigUser::with_user_id("a")
            .with_custom_id("groupID", "g")
            .with_custom_id("stableID", "device");
        assert!(is_valid(
            &user,
            Some(&keys(json!({"userID": "a", "customIDs": {"groupID": "g", "stableID": "other"}})))
        ));
    }

    #[test]
    fn mismatched_ids_are_invalid() {
        let user = StatsigUser::with_user_id("a").with_custom_id("groupID", "g");
        assert!(!is_valid(&user, Some(&keys(json!({"userID": "b", "customIDs": {"groupID": "g"}})))));
        assert!(!is_valid(&user, Some(&keys(json!({"userID": "a"})))));
        assert!(!is_valid(
            &StatsigUser::with_user_id("a"),
            Some(&keys(json!({"userID": "a", "customIDs": {"groupID": "g"}})))
        ));
    }

    #[test]
    fn only_stable_id_is_ignored() {
        let user = StatsigUser::new().with_custom_id("stableID", "device");
        assert!(is_valid(&user, Some(&keys(json!({"customIDs": {"stableID": "x"}})))));
    }
}

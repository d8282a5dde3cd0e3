//! Cache keys derived from a user's ID-bearing fields.
use std::sync::Arc;

use crate::{hashing::djb2, StatsigUser};

/// Caller-supplied replacement for the default cache key derivation. Receives the SDK key and the
/// user.
pub type CustomCacheKeyFn = Arc<dyn Fn(&str, &StatsigUser) -> String + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserCacheKey {
    /// Legacy key: user ID (or `"null"`) followed by each custom ID type and value.
    pub v1: String,
    /// Current key: djb2 of `uid:{id}|cids:{sorted type-value pairs}|k:{sdk key}`.
    pub v2: String,
    /// Hash of the full user object. Differs whenever any attribute changes.
    pub full: String,
}

impl UserCacheKey {
    pub fn from_user(
        user: &StatsigUser,
        sdk_key: &str,
        custom: Option<&CustomCacheKeyFn>,
    ) -> UserCacheKey {
        let full = user.full_user_hash();
        if let Some(custom) = custom {
            let key = custom(sdk_key, user);
            return UserCacheKey {
                v1: key.clone(),
                v2: key,
                full,
            };
        }
        UserCacheKey {
            v1: v1_key(user),
            v2: v2_key(user, sdk_key),
            full,
        }
    }
}

fn v1_key(user: &StatsigUser) -> String {
    let mut key = user.user_id.clone().unwrap_or_else(|| "null".to_owned());
    for (id_type, id) in user.custom_ids.iter().flatten() {
        key.push_str(id_type);
        key.push_str(id);
    }
    key
}

fn v2_key(user: &StatsigUser, sdk_key: &str) -> String {
    let mut cids: Vec<String> = user
        .custom_ids
        .iter()
        .flatten()
        .map(|(id_type, id)| format!("{id_type}-{id}"))
        .collect();
    cids.sort();
    let raw = format!(
        "uid:{}|cids:{}|k:{}",
        user.user_id.as_deref().unwrap_or_default(),
        cids.join(","),
        sdk_key
    );
    djb2(&raw)
}

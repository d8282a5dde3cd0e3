//! The user identity that gates, configs and experiments are evaluated against.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hashing::djb2;

/// Key of the device stable ID inside [`StatsigUser::statsig_metadata`] and `customIDs`.
pub const STABLE_ID_KEY: &str = "stableID";

/// The user object to be evaluated against your Statsig configurations.
///
/// Only ID-bearing fields (`user_id` and `custom_ids`) participate in cache keys, so two users
/// with the same IDs share cached values even if other attributes differ.
///
/// # Examples
/// ```
/// # use statsig::StatsigUser;
/// let user = StatsigUser::with_user_id("a-user")
///     .with_email("a-user@example.com")
///     .with_custom_id("groupID", "g-1");
/// assert_eq!(user.get_unit_id("groupID").as_deref(), Some("g-1"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsigUser {
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// Custom attributes. Evaluated against `user_field` conditions and logged with events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<BTreeMap<String, Value>>,
    /// Attributes used for evaluation but never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_attributes: Option<BTreeMap<String, Value>>,
    #[serde(rename = "customIDs", default, skip_serializing_if = "Option::is_none")]
    pub custom_ids: Option<BTreeMap<String, String>>,
    /// Environment tags, e.g. `{"tier": "staging"}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub statsig_environment: BTreeMap<String, String>,
    /// Device metadata sent as `statsigMetadata`. Contains the stable ID once the client has
    /// attached it.
    #[serde(skip)]
    pub(crate) statsig_metadata: BTreeMap<String, String>,
}

impl StatsigUser {
    pub fn new() -> StatsigUser {
        StatsigUser::default()
    }

    pub fn with_user_id(user_id: impl Into<String>) -> StatsigUser {
        StatsigUser {
            user_id: Some(user_id.into()),
            ..StatsigUser::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> StatsigUser {
        self.email = Some(email.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> StatsigUser {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> StatsigUser {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> StatsigUser {
        self.country = Some(country.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> StatsigUser {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_app_version(mut self, app_version: impl Into<String>) -> StatsigUser {
        self.app_version = Some(app_version.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> StatsigUser {
        self.custom
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_private_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> StatsigUser {
        self.private_attributes
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_custom_id(mut self, id_type: impl Into<String>, id: impl Into<String>) -> StatsigUser {
        self.custom_ids
            .get_or_insert_with(BTreeMap::new)
            .insert(id_type.into(), id.into());
        self
    }

    pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<String>) -> StatsigUser {
        self.statsig_environment.insert(key.into(), value.into());
        self
    }

    /// Device stable ID, if one has been attached.
    pub fn stable_id(&self) -> Option<&str> {
        self.statsig_metadata.get(STABLE_ID_KEY).map(String::as_str)
    }

    pub(crate) fn set_stable_id(&mut self, stable_id: impl Into<String>) {
        self.statsig_metadata
            .insert(STABLE_ID_KEY.to_owned(), stable_id.into());
    }

    pub(crate) fn statsig_metadata(&self) -> &BTreeMap<String, String> {
        &self.statsig_metadata
    }

    pub(crate) fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.statsig_metadata.insert(key.into(), value.into());
    }

    /// Look up a user attribute for `user_field`, `ip_based` and `ua_based` conditions.
    ///
    /// Well-known fields are matched case-insensitively. Anything else is looked up in `custom`,
    /// then in `private_attributes`.
    pub fn get_user_value(&self, field: Option<&str>) -> Option<Value> {
        let field = field?;
        let lowered = field.to_lowercase();

        let known = match lowered.as_str() {
            "userid" | "user_id" => self.user_id.as_ref(),
            "email" => self.email.as_ref(),
            "ip" | "ipaddress" | "ip_address" => self.ip.as_ref(),
            "useragent" | "user_agent" => self.user_agent.as_ref(),
            "country" => self.country.as_ref(),
            "locale" => self.locale.as_ref(),
            "appversion" | "app_version" => self.app_version.as_ref(),
            _ => None,
        };
        if let Some(value) = known {
            return Some(Value::String(value.clone()));
        }

        for attributes in [&self.custom, &self.private_attributes].into_iter().flatten() {
            if let Some(value) = attributes.get(field).or_else(|| attributes.get(&lowered)) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Look up an environment tag for `environment_field` conditions.
    pub fn get_from_environment(&self, field: Option<&str>) -> Option<Value> {
        let field = field?;
        self.statsig_environment
            .get(field)
            .or_else(|| self.statsig_environment.get(&field.to_lowercase()))
            .map(|value| Value::String(value.clone()))
    }

    /// Unit ID for the given ID type. `userID` maps to the user ID; other types come from
    /// `custom_ids`, falling back to the stable ID for `stableID`.
    pub fn get_unit_id(&self, id_type: &str) -> Option<String> {
        if id_type.eq_ignore_ascii_case("userid") || id_type.is_empty() {
            return self.user_id.clone();
        }
        let from_custom = self.custom_ids.as_ref().and_then(|ids| {
            ids.get(id_type)
                .or_else(|| ids.get(&id_type.to_lowercase()))
                .cloned()
        });
        from_custom.or_else(|| {
            if id_type.eq_ignore_ascii_case(STABLE_ID_KEY) {
                self.stable_id().map(str::to_owned)
            } else {
                None
            }
        })
    }

    /// JSON form sent to the server. Private attributes are stripped when `for_logging` is set.
    pub fn to_json(&self, for_logging: bool) -> Value {
        let mut map = Map::new();
        let mut put = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                map.insert(key.to_owned(), Value::String(value.clone()));
            }
        };
        put("userID", &self.user_id);
        put("email", &self.email);
        put("ip", &self.ip);
        put("userAgent", &self.user_agent);
        put("country", &self.country);
        put("locale", &self.locale);
        put("appVersion", &self.app_version);

        if let Some(custom) = &self.custom {
            map.insert("custom".to_owned(), to_object(custom));
        }
        if let Some(custom_ids) = &self.custom_ids {
            let ids = custom_ids
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert("customIDs".to_owned(), Value::Object(ids));
        }
        if !self.statsig_environment.is_empty() {
            let env = self
                .statsig_environment
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert("statsigEnvironment".to_owned(), Value::Object(env));
        }
        if !for_logging {
            if let Some(private_attributes) = &self.private_attributes {
                map.insert("privateAttributes".to_owned(), to_object(private_attributes));
            }
        }
        Value::Object(map)
    }

    /// djb2 of the user's sorted `key:value` pairs, recursing into nested objects. Used to detect
    /// when cached values were computed for a different version of this user.
    pub fn full_user_hash(&self) -> String {
        djb2(&sorted_pairs(&self.to_json(false)))
    }
}

fn to_object(values: &BTreeMap<String, Value>) -> Value {
    Value::Object(values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn sorted_pairs(value: &Value) -> String {
    let Value::Object(map) = value else {
        return render_scalar(value);
    };
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| match &map[key] {
            nested @ Value::Object(_) => format!("{key}:{}", sorted_pairs(nested)),
            other => format!("{key}:{}", render_scalar(other)),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

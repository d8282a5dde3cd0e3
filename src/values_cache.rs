//! Per-user snapshot of pre-evaluated values, persisted through [`KeyValueStorage`], along with
//! sticky experiment bookkeeping.
//!
//! Entries are keyed by the v2 user cache key. The whole set of entries is persisted as a single
//! versioned blob; older blobs are migrated at load time by [`migrate`].
use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    evaluation_details::{EvaluationDetails, EvaluationReason, EvaluationSource},
    hashing::HashAlgorithm,
    response::{ApiConfig, ApiGate, InitializeResponse, SdkFlags},
    storage::KeyValueStorage,
    user_cache_key::UserCacheKey,
};

pub(crate) const CACHE_STORAGE_KEY: &str = "com.Statsig.StorageKeys.localStorageKeyV2";
pub(crate) const LEGACY_CACHE_STORAGE_KEY: &str = "com.Statsig.StorageKeys.localStorageKey";
pub(crate) const STICKY_DEVICE_STORAGE_KEY: &str =
    "com.Statsig.StorageKeys.stickyDeviceExperimentsKey";

pub(crate) const MAX_CACHED_USERS: usize = 10;
const CACHE_VERSION: u32 = 2;

/// Values stored for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub(crate) struct CacheEntry {
    #[serde(default)]
    pub feature_gates: HashMap<String, ApiGate>,
    #[serde(default)]
    pub dynamic_configs: HashMap<String, ApiConfig>,
    #[serde(default)]
    pub layer_configs: HashMap<String, ApiConfig>,
    #[serde(default)]
    pub param_stores: HashMap<String, Map<String, Value>>,
    /// User-scoped sticky values keyed by hashed experiment or layer name.
    #[serde(default)]
    pub sticky_experiments: HashMap<String, ApiConfig>,
    #[serde(default)]
    pub time: u64,
    /// When the values were last replaced, in milliseconds.
    #[serde(default)]
    pub evaluation_time: u64,
    /// Full hash of the user the values were fetched for.
    #[serde(default)]
    pub user_hash: Option<String>,
    #[serde(default)]
    pub hash_used: Option<String>,
    #[serde(default)]
    pub derived_fields: Map<String, Value>,
    #[serde(default)]
    pub full_checksum: Option<String>,
    #[serde(default)]
    pub sdk_flags: SdkFlags,
}

impl CacheEntry {
    fn hash(&self, name: &str) -> String {
        HashAlgorithm::from_hash_used(self.hash_used.as_deref()).hash_name(name)
    }

    fn replace_values(&mut self, response: InitializeResponse, user_hash: &str, now: u64) {
        self.feature_gates = response.feature_gates;
        self.dynamic_configs = response.dynamic_configs;
        self.layer_configs = response.layer_configs;
        self.param_stores = response.param_stores;
        self.time = response.time;
        self.hash_used = response.hash_used;
        self.derived_fields = response.derived_fields;
        self.full_checksum = response.full_checksum;
        self.sdk_flags = response.sdk_flags;
        self.user_hash = Some(user_hash.to_owned());
        self.evaluation_time = now;
    }
}

/// Persisted form of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub(crate) struct CacheBlob {
    pub version: u32,
    #[serde(default)]
    pub entries: HashMap<String, CacheEntry>,
}

/// Convert any persisted cache shape into the current one.
///
/// Version 1 blobs are a bare map of cache key to entry. Entries that fail to parse are dropped.
/// Running `migrate` on its own output yields the same blob.
pub(crate) fn migrate(raw: Value) -> CacheBlob {
    let Value::Object(mut object) = raw else {
        return CacheBlob {
            version: CACHE_VERSION,
            entries: HashMap::new(),
        };
    };

    let is_versioned = object
        .get("version")
        .and_then(Value::as_u64)
        .is_some_and(|version| version >= u64::from(CACHE_VERSION));
    let raw_entries = if is_versioned {
        match object.remove("entries") {
            Some(Value::Object(entries)) => entries,
            _ => Map::new(),
        }
    } else {
        log::debug!(target: "statsig", "migrating legacy cache blob");
        object
    };

    let entries = raw_entries
        .into_iter()
        .filter_map(|(key, raw)| match serde_json::from_value::<CacheEntry>(raw) {
            Ok(entry) => Some((key, entry)),
            Err(err) => {
                log::warn!(target: "statsig", key = key.as_str(); "dropping unreadable cache entry: {err}");
                None
            }
        })
        .collect();

    CacheBlob {
        version: CACHE_VERSION,
        entries,
    }
}

/// Outcome of a lookup that may be served from a sticky record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StickyLookup {
    pub value: Option<ApiConfig>,
    pub reason: EvaluationReason,
}

pub(crate) struct ValuesCache {
    storage: Arc<dyn KeyValueStorage>,
    entries: HashMap<String, CacheEntry>,
    sticky_device: HashMap<String, ApiConfig>,
    user_key: UserCacheKey,
    source: EvaluationSource,
}

impl ValuesCache {
    pub(crate) fn load(storage: Arc<dyn KeyValueStorage>, user_key: UserCacheKey) -> ValuesCache {
        let blob = match storage.get(CACHE_STORAGE_KEY) {
            Some(raw) => migrate(raw),
            None => match storage.get(LEGACY_CACHE_STORAGE_KEY) {
                Some(raw) => {
                    let blob = migrate(raw);
                    storage.remove(LEGACY_CACHE_STORAGE_KEY);
                    blob
                }
                None => CacheBlob::default(),
            },
        };

        let sticky_device = storage
            .get_dictionary(STICKY_DEVICE_STORAGE_KEY)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, raw)| Some((name, serde_json::from_value(raw).ok()?)))
            .collect();

        let mut cache = ValuesCache {
            storage,
            entries: blob.entries,
            sticky_device,
            user_key: user_key.clone(),
            source: EvaluationSource::Loading,
        };
        cache.set_user(user_key);
        cache.persist();
        cache
    }

    /// Switch to another user. A legacy-keyed entry for the user is moved under the v2 key.
    pub(crate) fn set_user(&mut self, user_key: UserCacheKey) {
        if user_key.v1 != user_key.v2 && !self.entries.contains_key(&user_key.v2) {
            if let Some(entry) = self.entries.remove(&user_key.v1) {
                log::debug!(target: "statsig", "migrating cache entry to v2 key");
                self.entries.insert(user_key.v2.clone(), entry);
                self.persist();
            }
        }
        self.source = if self.entries.contains_key(&user_key.v2) {
            EvaluationSource::Cache
        } else {
            EvaluationSource::Loading
        };
        self.user_key = user_key;
    }

    pub(crate) fn user_key(&self) -> &UserCacheKey {
        &self.user_key
    }

    pub(crate) fn source(&self) -> EvaluationSource {
        self.source
    }

    fn current(&self) -> Option<&CacheEntry> {
        self.entries.get(&self.user_key.v2)
    }

    /// Entry to base an incremental fetch on. Only returned when it was fetched for exactly the
    /// same user.
    pub(crate) fn entry_for_sync(&self, user_key: &UserCacheKey) -> Option<&CacheEntry> {
        self.entries
            .get(&user_key.v2)
            .filter(|entry| entry.user_hash.as_deref() == Some(user_key.full.as_str()))
    }

    pub(crate) fn sdk_flags(&self) -> SdkFlags {
        self.current()
            .map(|entry| entry.sdk_flags.clone())
            .unwrap_or_default()
    }

    pub(crate) fn details(&self, reason: EvaluationReason) -> EvaluationDetails {
        match self.current() {
            Some(entry) => EvaluationDetails::new(
                self.source,
                reason,
                Some(entry.time),
                Some(entry.evaluation_time),
            ),
            None => EvaluationDetails::new(self.source, reason, None, None),
        }
    }

    pub(crate) fn gate(&self, name: &str) -> Option<ApiGate> {
        let entry = self.current()?;
        entry.feature_gates.get(&entry.hash(name)).cloned()
    }

    pub(crate) fn config(&self, name: &str) -> Option<ApiConfig> {
        let entry = self.current()?;
        entry.dynamic_configs.get(&entry.hash(name)).cloned()
    }

    pub(crate) fn layer(&self, name: &str) -> Option<ApiConfig> {
        let entry = self.current()?;
        entry.layer_configs.get(&entry.hash(name)).cloned()
    }

    pub(crate) fn param_store(&self, name: &str) -> Option<Map<String, Value>> {
        let entry = self.current()?;
        entry.param_stores.get(&entry.hash(name)).cloned()
    }

    /// Store a response for `user_key`.
    ///
    /// Responses with `has_updates` replace the user's gate, config, layer and parameter store
    /// values wholesale and set the source to `source`. Responses without updates leave the values
    /// untouched and only mark them as confirmed current.
    pub(crate) fn save_values(
        &mut self,
        response: InitializeResponse,
        user_key: &UserCacheKey,
        source: EvaluationSource,
        now: u64,
    ) {
        let is_current = user_key.v2 == self.user_key.v2;
        if response.has_updates {
            self.entries
                .entry(user_key.v2.clone())
                .or_default()
                .replace_values(response, &user_key.full, now);
            if is_current {
                self.source = source;
            }
            self.persist();
        } else if is_current && self.entries.contains_key(&user_key.v2) {
            self.source = EvaluationSource::NetworkNotModified;
        }
    }

    /// Called once a fetch for the current user finished, successfully or not.
    pub(crate) fn finish_loading(&mut self) {
        if self.source == EvaluationSource::Loading {
            self.source = EvaluationSource::NoValues;
        }
    }

    fn sticky(&self, hashed_name: &str) -> Option<&ApiConfig> {
        self.current()
            .and_then(|entry| entry.sticky_experiments.get(hashed_name))
            .or_else(|| self.sticky_device.get(hashed_name))
    }

    fn save_sticky(&mut self, hashed_name: String, value: ApiConfig) {
        if value.is_device_based {
            self.sticky_device.insert(hashed_name, value);
            self.persist_sticky_device();
        } else if let Some(entry) = self.entries.get_mut(&self.user_key.v2) {
            entry.sticky_experiments.insert(hashed_name, value);
            self.persist();
        }
    }

    fn remove_sticky(&mut self, hashed_name: &str) {
        if self.sticky_device.remove(hashed_name).is_some() {
            self.persist_sticky_device();
        }
        let removed = self
            .entries
            .get_mut(&self.user_key.v2)
            .and_then(|entry| entry.sticky_experiments.remove(hashed_name))
            .is_some();
        if removed {
            self.persist();
        }
    }

    /// Whether the experiment a sticky record pins is still running.
    fn is_pinned_experiment_active(&self, sticky: &ApiConfig, latest: Option<&ApiConfig>, is_layer: bool) -> bool {
        if !is_layer {
            return latest.is_some_and(|latest| latest.is_experiment_active);
        }
        let Some(entry) = self.current() else {
            return false;
        };
        sticky
            .allocated_experiment_name
            .as_deref()
            .and_then(|experiment| entry.dynamic_configs.get(experiment))
            .is_some_and(|experiment| experiment.is_experiment_active)
    }

    /// Resolve an experiment (`is_layer == false`) or layer lookup through sticky records.
    ///
    /// With `keep_device_value` unset, any sticky record is discarded and the latest value is
    /// returned. Otherwise the first value seen while the user is enrolled in an active experiment
    /// is pinned and returned until that experiment stops being active.
    pub(crate) fn resolve_sticky(&mut self, name: &str, keep_device_value: bool, is_layer: bool) -> StickyLookup {
        let Some(hashed_name) = self.current().map(|entry| entry.hash(name)) else {
            return StickyLookup {
                value: None,
                reason: EvaluationReason::Unrecognized,
            };
        };
        let latest = if is_layer { self.layer(name) } else { self.config(name) };
        let latest_reason = if latest.is_some() {
            EvaluationReason::Recognized
        } else {
            EvaluationReason::Unrecognized
        };
        let latest_is_enrolled = latest
            .as_ref()
            .is_some_and(|latest| latest.is_experiment_active && latest.is_user_in_experiment);

        if !keep_device_value {
            self.remove_sticky(&hashed_name);
            return StickyLookup {
                value: latest,
                reason: latest_reason,
            };
        }

        let Some(sticky) = self.sticky(&hashed_name).cloned() else {
            if let Some(latest) = latest.as_ref().filter(|_| latest_is_enrolled) {
                self.save_sticky(hashed_name, latest.clone());
            }
            return StickyLookup {
                value: latest,
                reason: latest_reason,
            };
        };

        if self.is_pinned_experiment_active(&sticky, latest.as_ref(), is_layer) {
            return StickyLookup {
                value: Some(sticky),
                reason: EvaluationReason::Sticky,
            };
        }

        match latest.as_ref().filter(|_| latest_is_enrolled) {
            Some(latest) => self.save_sticky(hashed_name, latest.clone()),
            None => self.remove_sticky(&hashed_name),
        }
        StickyLookup {
            value: latest,
            reason: latest_reason,
        }
    }

    fn persist(&mut self) {
        while self.entries.len() > MAX_CACHED_USERS {
            let oldest = self
                .entries
                .iter()
                .filter(|(key, _)| **key != self.user_key.v2)
                .min_by_key(|(_, entry)| entry.evaluation_time)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }

        let blob = CacheBlob {
            version: CACHE_VERSION,
            entries: self.entries.clone(),
        };
        match serde_json::to_value(&blob) {
            Ok(value) => self.storage.set(CACHE_STORAGE_KEY, value),
            Err(err) => log::warn!(target: "statsig", "failed to serialize values cache: {err}"),
        }
    }

    fn persist_sticky_device(&self) {
        let dictionary = self
            .sticky_device
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), serde_json::to_value(value).ok()?)))
            .collect();
        self.storage
            .set_dictionary(STICKY_DEVICE_STORAGE_KEY, &dictionary);
    }
}

//! Thread-safe access to cached values, layered under local overrides and over on-device
//! evaluation.
//!
//! Readers share the cache concurrently. Every mutation, including sticky experiment bookkeeping,
//! takes the write lock, so a cache entry is only ever replaced as a whole.
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::{
    dynamic_config::DynamicConfig,
    evaluation_details::{EvaluationDetails, EvaluationReason, EvaluationSource},
    feature_gate::FeatureGate,
    layer::Layer,
    on_device::{prefer_on_device, OnDeviceEvaluator},
    overrides::{LocalOverrides, StatsigOverrides},
    parameter_store::ParameterStore,
    response::{InitializeResponse, SdkFlags},
    storage::KeyValueStorage,
    user_cache_key::UserCacheKey,
    values_cache::ValuesCache,
    StatsigUser,
};

/// Values an incremental fetch is based on.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SyncState {
    pub since_time: u64,
    pub previous_derived_fields: Map<String, Value>,
    pub full_checksum: Option<String>,
}

pub(crate) struct Store {
    cache: RwLock<ValuesCache>,
    overrides: RwLock<LocalOverrides>,
    on_device: Option<Arc<OnDeviceEvaluator>>,
}

impl Store {
    pub(crate) fn new(
        storage: Arc<dyn KeyValueStorage>,
        user_key: UserCacheKey,
        on_device: Option<Arc<OnDeviceEvaluator>>,
    ) -> Store {
        Store {
            cache: RwLock::new(ValuesCache::load(Arc::clone(&storage), user_key)),
            overrides: RwLock::new(LocalOverrides::load(storage)),
            on_device,
        }
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, ValuesCache> {
        self.cache
            .read()
            .expect("thread holding cache lock should not panic")
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, ValuesCache> {
        self.cache
            .write()
            .expect("thread holding cache lock should not panic")
    }

    fn read_overrides(&self) -> std::sync::RwLockReadGuard<'_, LocalOverrides> {
        self.overrides
            .read()
            .expect("thread holding overrides lock should not panic")
    }

    fn write_overrides(&self) -> std::sync::RwLockWriteGuard<'_, LocalOverrides> {
        self.overrides
            .write()
            .expect("thread holding overrides lock should not panic")
    }

    pub(crate) fn source(&self) -> EvaluationSource {
        self.read_cache().source()
    }

    pub(crate) fn sdk_flags(&self) -> SdkFlags {
        self.read_cache().sdk_flags()
    }

    pub(crate) fn check_gate(&self, user: &StatsigUser, name: &str) -> FeatureGate {
        let (gate, details) = {
            let cache = self.read_cache();
            if let Some(value) = self.read_overrides().gate(name) {
                let details = cache.details(EvaluationReason::LocalOverride);
                let mut gate = FeatureGate::empty(name, details);
                gate.value = value;
                gate.rule_id = "override".to_owned();
                return gate;
            }
            match cache.gate(name) {
                Some(gate) => (Some(gate), cache.details(EvaluationReason::Recognized)),
                None => (None, cache.details(EvaluationReason::Unrecognized)),
            }
        };
        let gate = match gate {
            Some(gate) => FeatureGate::from_api(name, gate, details),
            None => FeatureGate::empty(name, details),
        };

        match self.on_device.as_ref().and_then(|on_device| on_device.gate(user, name)) {
            Some(on_device) if prefer_on_device(gate.evaluation_details.lcut, on_device.evaluation_details.lcut) => on_device,
            _ => gate,
        }
    }

    pub(crate) fn get_config(&self, user: &StatsigUser, name: &str) -> DynamicConfig {
        if let Some(config) = self.config_override(name) {
            return config;
        }
        let config = {
            let cache = self.read_cache();
            match cache.config(name) {
                Some(config) => {
                    DynamicConfig::from_api(name, config, cache.details(EvaluationReason::Recognized))
                }
                None => DynamicConfig::empty(name, cache.details(EvaluationReason::Unrecognized)),
            }
        };
        self.prefer_on_device_config(user, name, config)
    }

    pub(crate) fn get_experiment(
        &self,
        user: &StatsigUser,
        name: &str,
        keep_device_value: bool,
    ) -> DynamicConfig {
        if let Some(config) = self.config_override(name) {
            return config;
        }
        let config = {
            let mut cache = self.write_cache();
            let lookup = cache.resolve_sticky(name, keep_device_value, false);
            let details = cache.details(lookup.reason);
            match lookup.value {
                Some(config) => DynamicConfig::from_api(name, config, details),
                None => DynamicConfig::empty(name, details),
            }
        };
        self.prefer_on_device_config(user, name, config)
    }

    fn config_override(&self, name: &str) -> Option<DynamicConfig> {
        let cache = self.read_cache();
        let value = self.read_overrides().config(name)?.clone();
        let mut config = DynamicConfig::empty(name, cache.details(EvaluationReason::LocalOverride));
        config.value = value;
        config.rule_id = "override".to_owned();
        Some(config)
    }

    fn prefer_on_device_config(&self, user: &StatsigUser, name: &str, config: DynamicConfig) -> DynamicConfig {
        match self.on_device.as_ref().and_then(|on_device| on_device.config(user, name)) {
            Some(on_device) if prefer_on_device(config.evaluation_details.lcut, on_device.evaluation_details.lcut) => on_device,
            _ => config,
        }
    }

    pub(crate) fn get_layer(&self, user: &StatsigUser, name: &str, keep_device_value: bool) -> Layer {
        {
            let cache = self.read_cache();
            if let Some(value) = self.read_overrides().layer(name) {
                let mut layer = Layer::empty(name, cache.details(EvaluationReason::LocalOverride));
                layer.value = value.clone();
                layer.rule_id = "override".to_owned();
                return layer;
            }
        }
        let layer = {
            let mut cache = self.write_cache();
            let lookup = cache.resolve_sticky(name, keep_device_value, true);
            let details = cache.details(lookup.reason);
            match lookup.value {
                Some(layer) => Layer::from_api(name, layer, details),
                None => Layer::empty(name, details),
            }
        };

        match self.on_device.as_ref().and_then(|on_device| on_device.layer(user, name)) {
            Some(on_device) if prefer_on_device(layer.evaluation_details.lcut, on_device.evaluation_details.lcut) => on_device,
            _ => layer,
        }
    }

    pub(crate) fn get_param_store(&self, name: &str) -> ParameterStore {
        let store = {
            let cache = self.read_cache();
            match cache.param_store(name) {
                Some(parameters) => ParameterStore::new(
                    name,
                    parameters,
                    cache.details(EvaluationReason::Recognized),
                ),
                None => ParameterStore::new(name, Map::new(), cache.details(EvaluationReason::Unrecognized)),
            }
        };

        match self.on_device.as_ref().and_then(|on_device| on_device.param_store(name)) {
            Some(on_device) if prefer_on_device(store.evaluation_details.lcut, on_device.evaluation_details.lcut) => on_device,
            _ => store,
        }
    }

    pub(crate) fn details(&self, reason: EvaluationReason) -> EvaluationDetails {
        self.read_cache().details(reason)
    }

    pub(crate) fn set_user(&self, user_key: UserCacheKey) {
        self.write_cache().set_user(user_key);
    }

    pub(crate) fn user_key(&self) -> UserCacheKey {
        self.read_cache().user_key().clone()
    }

    pub(crate) fn sync_state(&self, user_key: &UserCacheKey) -> SyncState {
        let cache = self.read_cache();
        match cache.entry_for_sync(user_key) {
            Some(entry) => SyncState {
                since_time: entry.time,
                previous_derived_fields: entry.derived_fields.clone(),
                full_checksum: entry.full_checksum.clone(),
            },
            None => SyncState::default(),
        }
    }

    pub(crate) fn save_values(
        &self,
        response: InitializeResponse,
        user_key: &UserCacheKey,
        source: EvaluationSource,
        now: u64,
    ) {
        self.write_cache().save_values(response, user_key, source, now);
    }

    pub(crate) fn finish_loading(&self) {
        self.write_cache().finish_loading();
    }

    pub(crate) fn override_gate(&self, name: &str, value: bool) {
        self.write_overrides().override_gate(name, value);
    }

    pub(crate) fn override_config(&self, name: &str, value: Map<String, Value>) {
        self.write_overrides().override_config(name, value);
    }

    pub(crate) fn override_layer(&self, name: &str, value: Map<String, Value>) {
        self.write_overrides().override_layer(name, value);
    }

    pub(crate) fn remove_override(&self, name: &str) {
        self.write_overrides().remove(name);
    }

    pub(crate) fn remove_all_overrides(&self) {
        self.write_overrides().remove_all();
    }

    pub(crate) fn all_overrides(&self) -> StatsigOverrides {
        self.read_overrides().all()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::storage::InMemoryStorage;

    fn user() -> StatsigUser {
        StatsigUser::with_user_id("a")
    }

    fn key() -> UserCacheKey {
        UserCacheKey::from_user(&user(), "client-key", None)
    }

    fn store(on_device: Option<OnDeviceEvaluator>) -> Store {
        Store::new(Arc::new(InMemoryStorage::new()), key(), on_device.map(Arc::new))
    }

    fn save(store: &Store, value: Value) {
        store.save_values(
            serde_json::from_value(value).unwrap(),
            &key(),
            EvaluationSource::Network,
            10,
        );
    }

    #[test]
    fn network_then_not_modified() {
        let store = store(None);
        save(
            &store,
            json!({
                "has_updates": true, "time": 100, "hash_used": "sha256",
                "feature_gates": {crate::hashing::sha256_base64("a_gate"): {"value": true, "rule_id": "r1"}}
            }),
        );
        let gate = store.check_gate(&user(), "a_gate");
        assert!(gate.value);
        assert_eq!(gate.rule_id, "r1");
        assert_eq!(gate.evaluation_details.detailed_reason(), "Network:Recognized");

        save(&store, json!({"has_updates": false}));
        let gate = store.check_gate(&user(), "a_gate");
        assert!(gate.value);
        assert_eq!(gate.evaluation_details.source, EvaluationSource::NetworkNotModified);
    }

    #[test]
    fn unknown_names_are_unrecognized() {
        let store = store(None);
        store.finish_loading();
        let config = store.get_config(&user(), "nope");
        assert!(config.value.is_empty());
        assert_eq!(config.evaluation_details.detailed_reason(), "NoValues");

        save(&store, json!({"has_updates": true, "time": 1}));
        let config = store.get_config(&user(), "nope");
        assert_eq!(config.evaluation_details.detailed_reason(), "Network:Unrecognized");
    }

    #[test]
    fn overrides_win() {
        let store = store(None);
        save(
            &store,
            json!({
                "has_updates": true, "hash_used": "none",
                "feature_gates": {"g": {"value": false}},
                "dynamic_configs": {"c": {"value": {"a": 1}}}
            }),
        );
        store.override_gate("g", true);
        store.override_config("c", json!({"a": 2}).as_object().cloned().unwrap());
        store.override_layer("l", json!({"b": 3}).as_object().cloned().unwrap());

        let gate = store.check_gate(&user(), "g");
        assert!(gate.value);
        assert_eq!(gate.evaluation_details.reason, Some(EvaluationReason::LocalOverride));
        assert_eq!(store.get_config(&user(), "c").value["a"], json!(2));
        assert_eq!(store.get_experiment(&user(), "c", false).value["a"], json!(2));
        assert_eq!(store.get_layer(&user(), "l", false).value["b"], json!(3));
        assert_eq!(store.all_overrides().gates.len(), 1);

        store.remove_override("g");
        assert!(!store.check_gate(&user(), "g").value);
        store.remove_all_overrides();
        assert_eq!(store.get_config(&user(), "c").value["a"], json!(1));
    }

    #[test]
    fn on_device_results_replace_older_cache() {
        let on_device = OnDeviceEvaluator::from_json(
            r#"{
                "feature_gates": [{
                    "name": "g", "type": "feature_gate", "salt": "s", "defaultValue": false,
                    "enabled": true, "idType": "userID",
                    "rules": [{"name": "r", "id": "on_device", "salt": "rs", "passPercentage": 100,
                               "returnValue": true, "conditions": [{"type": "public"}]}]
                }],
                "time": 50
            }"#,
        )
        .unwrap();
        let store = store(Some(on_device));

        let gate = store.check_gate(&user(), "g");
        assert_eq!(gate.rule_id, "on_device");

        save(
            &store,
            json!({"has_updates": true, "time": 40, "hash_used": "none",
                   "feature_gates": {"g": {"value": false, "rule_id": "network"}}}),
        );
        assert_eq!(store.check_gate(&user(), "g").rule_id, "on_device");

        save(
            &store,
            json!({"has_updates": true, "time": 60, "hash_used": "none",
                   "feature_gates": {"g": {"value": false, "rule_id": "network"}}}),
        );
        assert_eq!(store.check_gate(&user(), "g").rule_id, "network");
    }

    #[test]
    fn sync_state_tracks_last_response() {
        let store = store(None);
        assert_eq!(store.sync_state(&key()), SyncState::default());
        save(
            &store,
            json!({"has_updates": true, "time": 77, "full_checksum": "abc",
                   "derived_fields": {"ip": "1.1.1.1"}}),
        );
        let state = store.sync_state(&key());
        assert_eq!(state.since_time, 77);
        assert_eq!(state.full_checksum.as_deref(), Some("abc"));
        assert_eq!(state.previous_derived_fields["ip"], json!("1.1.1.1"));
    }

    #[test]
    fn concurrent_saves_and_reads() {
        let store = Arc::new(store(None));
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.save_values(
                        serde_json::from_value(json!({
                            "has_updates": true, "time": i, "hash_used": "none",
                            "dynamic_configs": {"exp": {"value": {"i": i}, "rule_id": i.to_string(),
                                "is_experiment_active": true, "is_user_in_experiment": true}}
                        }))
                        .unwrap(),
                        &key(),
                        EvaluationSource::Network,
                        i,
                    );
                    store.get_experiment(&user(), "exp", true)
                })
            })
            .collect();
        for handle in handles {
            let config = handle.join().unwrap();
            assert_eq!(config.value["i"].as_str(), None);
            assert_eq!(config.value["i"].to_string(), config.rule_id);
        }
    }
}

//! Local developer overrides. They take precedence over every other value source and are persisted
//! in storage.
use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::KeyValueStorage;

pub(crate) const OVERRIDES_STORAGE_KEY: &str = "com.Statsig.InternalStore.localOverridesKey";

/// Snapshot of all active overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatsigOverrides {
    #[serde(rename = "feature_gates", default)]
    pub gates: HashMap<String, bool>,
    #[serde(rename = "dynamic_configs", default)]
    pub configs: HashMap<String, Map<String, Value>>,
    #[serde(rename = "layer_configs", default)]
    pub layers: HashMap<String, Map<String, Value>>,
}

pub(crate) struct LocalOverrides {
    storage: Arc<dyn KeyValueStorage>,
    overrides: StatsigOverrides,
}

impl LocalOverrides {
    pub(crate) fn load(storage: Arc<dyn KeyValueStorage>) -> LocalOverrides {
        let overrides = storage
            .get_dictionary(OVERRIDES_STORAGE_KEY)
            .and_then(|dict| serde_json::from_value(Value::Object(dict)).ok())
            .unwrap_or_default();
        LocalOverrides { storage, overrides }
    }

    pub(crate) fn gate(&self, name: &str) -> Option<bool> {
        self.overrides.gates.get(name).copied()
    }

    pub(crate) fn config(&self, name: &str) -> Option<&Map<String, Value>> {
        self.overrides.configs.get(name)
    }

    pub(crate) fn layer(&self, name: &str) -> Option<&Map<String, Value>> {
        self.overrides.layers.get(name)
    }

    pub(crate) fn all(&self) -> StatsigOverrides {
        self.overrides.clone()
    }

    pub(crate) fn override_gate(&mut self, name: &str, value: bool) {
        self.overrides.gates.insert(name.to_owned(), value);
        self.save();
    }

    pub(crate) fn override_config(&mut self, name: &str, value: Map<String, Value>) {
        self.overrides.configs.insert(name.to_owned(), value);
        self.save();
    }

    pub(crate) fn override_layer(&mut self, name: &str, value: Map<String, Value>) {
        self.overrides.layers.insert(name.to_owned(), value);
        self.save();
    }

    /// Remove every override with the given name, whatever its kind.
    pub(crate) fn remove(&mut self, name: &str) {
        self.overrides.gates.remove(name);
        self.overrides.configs.remove(name);
        self.overrides.layers.remove(name);
        self.save();
    }

    pub(crate) fn remove_all(&mut self) {
        self.overrides = StatsigOverrides::default();
        self.save();
    }

    fn save(&self) {
        match serde_json::to_value(&self.overrides) {
            Ok(Value::Object(dict)) => self.storage.set_dictionary(OVERRIDES_STORAGE_KEY, &dict),
            Ok(_) => {}
            Err(err) => log::warn!(target: "statsig", "failed to serialize overrides: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::InMemoryStorage;

    #[test]
    fn overrides_persist() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut overrides = LocalOverrides::load(storage.clone());
        overrides.override_gate("gate", true);
        overrides.override_config("config", json!({"a": 1}).as_object().cloned().unwrap());
        overrides.override_layer("layer", Map::new());

        let reloaded = LocalOverrides::load(storage);
        assert_eq!(reloaded.gate("gate"), Some(true));
        assert_eq!(reloaded.config("config").unwrap()["a"], json!(1));
        assert!(reloaded.layer("layer").is_some());
        assert_eq!(reloaded.all().gates.len(), 1);
    }

    #[test]
    fn remove_clears_every_kind() {
        let storage = Arc::new(InMemoryStorage::new());
        let mut overrides = LocalOverrides::load(storage.clone());
        overrides.override_gate("shared", true);
        overrides.override_config("shared", Map::new());
        overrides.override_gate("other", false);

        overrides.remove("shared");
        assert_eq!(overrides.gate("shared"), None);
        assert!(overrides.config("shared").is_none());
        assert_eq!(overrides.gate("other"), Some(false));

        overrides.remove_all();
        assert_eq!(LocalOverrides::load(storage).all(), StatsigOverrides::default());
    }
}

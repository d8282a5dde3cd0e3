//! Shape of an initialize response: pre-evaluated values for one user, keyed by hashed name.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{eval::SecondaryExposure, hashing::HashAlgorithm};

/// A gate value as computed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ApiGate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: bool,
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub secondary_exposures: Vec<SecondaryExposure>,
    #[serde(default)]
    pub id_type: Option<String>,
}

/// A dynamic config, experiment or layer value as computed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Map<String, Value>,
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub is_device_based: bool,
    #[serde(default)]
    pub is_experiment_active: bool,
    #[serde(default)]
    pub is_user_in_experiment: bool,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub secondary_exposures: Vec<SecondaryExposure>,
    #[serde(default)]
    pub explicit_parameters: Vec<String>,
    #[serde(default)]
    pub allocated_experiment_name: Option<String>,
    #[serde(default)]
    pub undelegated_secondary_exposures: Vec<SecondaryExposure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SdkFlags {
    #[serde(default)]
    pub enable_log_event_compression: bool,
}

/// Body of a `/v1/initialize` response, also accepted as `initialize_values` for bootstrapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InitializeResponse {
    #[serde(default)]
    pub has_updates: bool,
    /// Logical clock of the snapshot (last config update time).
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub feature_gates: HashMap<String, ApiGate>,
    #[serde(default)]
    pub dynamic_configs: HashMap<String, ApiConfig>,
    #[serde(default)]
    pub layer_configs: HashMap<String, ApiConfig>,
    /// Parameter stores keyed by hashed name. Each maps parameter names to their definitions.
    #[serde(default)]
    pub param_stores: HashMap<String, Map<String, Value>>,
    #[serde(default)]
    pub hash_used: Option<String>,
    #[serde(default)]
    pub derived_fields: Map<String, Value>,
    #[serde(default)]
    pub full_checksum: Option<String>,
    #[serde(default)]
    pub sdk_flags: SdkFlags,
    /// IDs of the user the values were computed for. Only meaningful for bootstrap values.
    #[serde(default)]
    pub evaluated_keys: Option<Map<String, Value>>,
    #[serde(default)]
    pub hashed_sdk_key_used: Option<String>,
}

impl InitializeResponse {
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::from_hash_used(self.hash_used.as_deref())
    }
}

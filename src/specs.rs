//! Wire models for on-device specs (`feature_gates`, `dynamic_configs`, `layer_configs` as lists
//! of rule trees) and the name-addressed arena they are compiled into.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A specs download as served to on-device evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecsResponse {
    /// Each spec is wrapped in `TryParse` so that one malformed spec doesn't prevent the rest from
    /// being served.
    #[serde(default)]
    pub feature_gates: Vec<TryParse<Spec>>,
    #[serde(default)]
    pub dynamic_configs: Vec<TryParse<Spec>>,
    #[serde(default)]
    pub layer_configs: Vec<TryParse<Spec>>,
    #[serde(default)]
    pub param_stores: HashMap<String, ParamStoreSpec>,
    /// Logical clock of the snapshot (last config update time).
    #[serde(default)]
    pub time: u64,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamStoreSpec {
    #[serde(default, rename = "targetAppIDs")]
    pub target_app_ids: Option<Vec<String>>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
}

/// One gate, dynamic config, experiment or layer definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub spec_type: String,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub default_value: Value,
    pub enabled: bool,
    #[serde(default)]
    pub id_type: String,
    #[serde(default)]
    pub explicit_parameters: Option<Vec<String>>,
    /// Evaluation order. The first passing rule wins.
    #[serde(default)]
    pub rules: Vec<SpecRule>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecRule {
    #[serde(default)]
    pub name: String,
    pub pass_percentage: f64,
    #[serde(default)]
    pub conditions: Vec<SpecCondition>,
    #[serde(default)]
    pub return_value: Value,
    pub id: String,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub id_type: String,
    /// Name of the experiment this layer rule allocates to.
    #[serde(default)]
    pub config_delegate: Option<String>,
    #[serde(default)]
    pub is_experiment_group: Option<bool>,
    #[serde(default)]
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(default)]
    pub target_value: Option<Value>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub additional_values: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub id_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecKind {
    Gate,
    Config,
    Layer,
}

/// Immutable arena of specs addressed by name.
#[derive(Debug, Clone, Default)]
pub struct Specs {
    gates: HashMap<String, Spec>,
    configs: HashMap<String, Spec>,
    layers: HashMap<String, Spec>,
    param_stores: HashMap<String, ParamStoreSpec>,
    time: u64,
}

impl Specs {
    pub fn from_response(response: SpecsResponse) -> Specs {
        Specs {
            gates: index(response.feature_gates),
            configs: index(response.dynamic_configs),
            layers: index(response.layer_configs),
            param_stores: response.param_stores,
            time: response.time,
        }
    }

    pub fn from_json(json: &str) -> crate::Result<Specs> {
        let response: SpecsResponse = serde_json::from_str(json)?;
        Ok(Specs::from_response(response))
    }

    pub fn get(&self, kind: SpecKind, name: &str) -> Option<&Spec> {
        match kind {
            SpecKind::Gate => self.gates.get(name),
            SpecKind::Config => self.configs.get(name),
            SpecKind::Layer => self.layers.get(name),
        }
    }

    pub fn param_store(&self, name: &str) -> Option<&ParamStoreSpec> {
        self.param_stores.get(name)
    }

    /// Last config update time of the snapshot.
    pub fn time(&self) -> u64 {
        self.time
    }
}

fn index(specs: Vec<TryParse<Spec>>) -> HashMap<String, Spec> {
    specs
        .into_iter()
        .filter_map(|spec| match spec {
            TryParse::Parsed(spec) => Some((spec.name.clone(), spec)),
            TryParse::ParseFailed(raw) => {
                log::warn!(target: "statsig", "failed to parse spec {:?}, skipping it", raw.get("name"));
                None
            }
        })
        .collect()
}

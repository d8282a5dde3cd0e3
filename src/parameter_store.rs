//! Parameter stores map parameter names to static values or to values of other gates, configs,
//! experiments and layers.
use std::{
    fmt,
    sync::{Arc, Weak},
};

use serde_json::{Map, Value};

use crate::{client::ClientInner, evaluation_details::EvaluationDetails, value::ConfigValue};

const REF_STATIC: &str = "static";
const REF_GATE: &str = "gate";
const REF_DYNAMIC_CONFIG: &str = "dynamic_config";
const REF_EXPERIMENT: &str = "experiment";
const REF_LAYER: &str = "layer";

#[derive(Clone)]
pub struct ParameterStore {
    pub name: String,
    pub evaluation_details: EvaluationDetails,
    pub(crate) parameters: Map<String, Value>,
    pub(crate) client: Weak<ClientInner>,
    pub(crate) log_exposure: bool,
}

impl fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterStore")
            .field("name", &self.name)
            .field("evaluation_details", &self.evaluation_details)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl ParameterStore {
    pub(crate) fn new(
        name: &str,
        parameters: Map<String, Value>,
        evaluation_details: EvaluationDetails,
    ) -> ParameterStore {
        ParameterStore {
            name: name.to_owned(),
            evaluation_details,
            parameters,
            client: Weak::new(),
            log_exposure: true,
        }
    }

    pub(crate) fn attach(mut self, client: &Arc<ClientInner>, log_exposure: bool) -> ParameterStore {
        self.client = Arc::downgrade(client);
        self.log_exposure = log_exposure;
        self
    }

    /// Resolve parameter `key`. Returns `default` when the parameter is unknown, declared with a
    /// different type than `T`, or its reference can't be resolved.
    pub fn get_value<T: ConfigValue>(&self, key: &str, default: T) -> T {
        self.resolve(key).unwrap_or(default)
    }

    fn resolve<T: ConfigValue>(&self, key: &str) -> Option<T> {
        let param = self.parameters.get(key)?.as_object()?;
        let param_type = param.get("param_type")?.as_str()?;
        if param_type != T::PARAM_TYPE {
            log::warn!(target: "statsig", store = self.name.as_str(), key, param_type;
                "parameter type does not match requested type");
            return None;
        }
        let ref_type = param.get("ref_type")?.as_str()?;
        if ref_type == REF_STATIC {
            return T::from_json(param.get("value")?);
        }

        let client = self.client.upgrade()?;
        let field = |name: &str| param.get(name).and_then(Value::as_str);
        match ref_type {
            REF_GATE => {
                let gate = client.check_gate_internal(field("gate_name")?, self.log_exposure);
                let value = if gate.value {
                    param.get("pass_value")?
                } else {
                    param.get("fail_value")?
                };
                T::from_json(value)
            }
            REF_DYNAMIC_CONFIG => client
                .get_config_internal(field("config_name")?, self.log_exposure)
                .get(field("param_name")?),
            REF_EXPERIMENT => client
                .get_experiment_internal(field("experiment_name")?, false, self.log_exposure)
                .get(field("param_name")?),
            REF_LAYER => client
                .get_layer_internal(field("layer_name")?, false, self.log_exposure)
                .get(field("param_name")?),
            other => {
                log::debug!(target: "statsig", store = self.name.as_str(), ref_type = other;
                    "unknown parameter reference type");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn static_values_resolve_without_client() {
        let store = ParameterStore::new(
            "store",
            json!({
                "title": {"param_type": "string", "ref_type": "static", "value": "hello"},
                "count": {"param_type": "number", "ref_type": "static", "value": 4}
            })
            .as_object()
            .cloned()
            .unwrap(),
            EvaluationDetails::uninitialized(),
        );
        assert_eq!(store.get_value("title", String::new()), "hello");
        assert_eq!(store.get_value("count", 0i64), 4);
        assert_eq!(store.get_value("count", String::from("d")), "d");
        assert!(!store.get_value("missing", false));
    }

    #[test]
    fn references_without_client_fall_back() {
        let store = ParameterStore::new(
            "store",
            json!({"flag": {"param_type": "boolean", "ref_type": "gate", "gate_name": "g",
                            "pass_value": true, "fail_value": false}})
            .as_object()
            .cloned()
            .unwrap(),
            EvaluationDetails::uninitialized(),
        );
        assert!(store.get_value("flag", true));
    }
}

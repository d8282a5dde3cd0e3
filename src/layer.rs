use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Weak},
};

use serde_json::{Map, Value};

use crate::{
    client::ClientInner,
    eval::{EvaluationResult, SecondaryExposure},
    evaluation_details::EvaluationDetails,
    response::ApiConfig,
    value::{get_typed, ConfigValue},
};

/// Values of a layer for the current user.
///
/// Parameters controlled by an experiment the user is allocated to carry the experiment's values;
/// the rest carry layer defaults. Reading a parameter through [`Layer::get_value`] logs a layer
/// exposure for that parameter.
#[derive(Clone)]
pub struct Layer {
    pub name: String,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub is_user_in_experiment: bool,
    pub is_experiment_active: bool,
    /// Name of the experiment the layer delegated to, if any.
    pub allocated_experiment_name: Option<String>,
    pub evaluation_details: EvaluationDetails,
    pub(crate) value: Map<String, Value>,
    pub(crate) is_device_based: bool,
    pub(crate) explicit_parameters: HashSet<String>,
    pub(crate) secondary_exposures: Vec<SecondaryExposure>,
    pub(crate) undelegated_secondary_exposures: Vec<SecondaryExposure>,
    pub(crate) client: Weak<ClientInner>,
    pub(crate) log_exposure: bool,
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("rule_id", &self.rule_id)
            .field("allocated_experiment_name", &self.allocated_experiment_name)
            .field("value", &self.value)
            .field("evaluation_details", &self.evaluation_details)
            .finish_non_exhaustive()
    }
}

impl Layer {
    pub(crate) fn empty(name: &str, evaluation_details: EvaluationDetails) -> Layer {
        Layer {
            name: name.to_owned(),
            rule_id: String::new(),
            group_name: None,
            is_user_in_experiment: false,
            is_experiment_active: false,
            allocated_experiment_name: None,
            evaluation_details,
            value: Map::new(),
            is_device_based: false,
            explicit_parameters: HashSet::new(),
            secondary_exposures: Vec::new(),
            undelegated_secondary_exposures: Vec::new(),
            client: Weak::new(),
            log_exposure: true,
        }
    }

    pub(crate) fn from_api(name: &str, config: ApiConfig, evaluation_details: EvaluationDetails) -> Layer {
        Layer {
            name: name.to_owned(),
            rule_id: config.rule_id,
            group_name: config.group_name,
            is_user_in_experiment: config.is_user_in_experiment,
            is_experiment_active: config.is_experiment_active,
            allocated_experiment_name: config
                .allocated_experiment_name
                .filter(|name| !name.is_empty()),
            evaluation_details,
            value: config.value,
            is_device_based: config.is_device_based,
            explicit_parameters: config.explicit_parameters.into_iter().collect(),
            secondary_exposures: config.secondary_exposures,
            undelegated_secondary_exposures: config.undelegated_secondary_exposures,
            client: Weak::new(),
            log_exposure: true,
        }
    }

    pub(crate) fn from_evaluation(
        name: &str,
        result: EvaluationResult,
        evaluation_details: EvaluationDetails,
    ) -> Layer {
        let value = match result.json_value {
            Value::Object(map) if !result.unsupported => map,
            _ => Map::new(),
        };
        Layer {
            name: name.to_owned(),
            rule_id: result.rule_id,
            group_name: result.group_name,
            is_user_in_experiment: result.is_experiment_group,
            is_experiment_active: result.is_experiment_active,
            allocated_experiment_name: result.config_delegate,
            evaluation_details,
            value,
            is_device_based: false,
            explicit_parameters: result.explicit_parameters.into_iter().collect(),
            secondary_exposures: result.secondary_exposures,
            undelegated_secondary_exposures: result.undelegated_secondary_exposures,
            client: Weak::new(),
            log_exposure: true,
        }
    }

    pub(crate) fn attach(mut self, client: &Arc<ClientInner>, log_exposure: bool) -> Layer {
        self.client = Arc::downgrade(client);
        self.log_exposure = log_exposure;
        self
    }

    /// Whether `parameter` is controlled by the allocated experiment rather than the layer.
    pub(crate) fn is_explicit(&self, parameter: &str) -> bool {
        self.explicit_parameters.contains(parameter)
    }

    pub(crate) fn exposures_for(&self, parameter: &str) -> &[SecondaryExposure] {
        if self.is_explicit(parameter) {
            &self.secondary_exposures
        } else {
            &self.undelegated_secondary_exposures
        }
    }

    /// Typed value for `key`, or `None` if it's missing or of a different type. A found value
    /// logs a layer exposure.
    pub fn get<T: ConfigValue>(&self, key: &str) -> Option<T> {
        let value = get_typed(&self.value, key, &self.name)?;
        if self.log_exposure {
            if let Some(client) = self.client.upgrade() {
                client.log_layer_exposure(self, key, false);
            }
        }
        Some(value)
    }

    pub fn get_value<T: ConfigValue>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// All values without logging any exposure.
    pub fn values(&self) -> &Map<String, Value> {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn layer() -> Layer {
        Layer::from_api(
            "layer",
            serde_json::from_value(json!({
                "value": {"a": 1, "b": "x"},
                "rule_id": "r",
                "allocated_experiment_name": "exp",
                "explicit_parameters": ["a"],
                "secondary_exposures": [{"gate": "g1", "gateValue": "true", "ruleID": "1"}],
                "undelegated_secondary_exposures": [{"gate": "g2", "gateValue": "false", "ruleID": "2"}]
            }))
            .unwrap(),
            EvaluationDetails::uninitialized(),
        )
    }

    #[test]
    fn exposures_depend_on_explicit_parameters() {
        let layer = layer();
        assert!(layer.is_explicit("a"));
        assert_eq!(layer.exposures_for("a")[0].gate, "g1");
        assert_eq!(layer.exposures_for("b")[0].gate, "g2");
    }

    #[test]
    fn detached_layer_still_reads_values() {
        let layer = layer();
        assert_eq!(layer.get_value("a", 0i64), 1);
        assert_eq!(layer.get_value("b", String::new()), "x");
        assert_eq!(layer.get_value("missing", 5i64), 5);
    }
}

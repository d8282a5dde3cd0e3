use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    eval::{EvaluationResult, SecondaryExposure},
    evaluation_details::EvaluationDetails,
    response::ApiConfig,
    value::{get_typed, ConfigValue},
};

/// A dynamic config or experiment value for the current user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicConfig {
    pub name: String,
    pub value: Map<String, Value>,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub is_user_in_experiment: bool,
    pub is_experiment_active: bool,
    pub(crate) is_device_based: bool,
    pub secondary_exposures: Vec<SecondaryExposure>,
    pub evaluation_details: EvaluationDetails,
}

impl DynamicConfig {
    pub(crate) fn empty(name: &str, evaluation_details: EvaluationDetails) -> DynamicConfig {
        DynamicConfig {
            name: name.to_owned(),
            value: Map::new(),
            rule_id: String::new(),
            group_name: None,
            is_user_in_experiment: false,
            is_experiment_active: false,
            is_device_based: false,
            secondary_exposures: Vec::new(),
            evaluation_details,
        }
    }

    pub(crate) fn from_api(
        name: &str,
        config: ApiConfig,
        evaluation_details: EvaluationDetails,
    ) -> DynamicConfig {
        DynamicConfig {
            name: name.to_owned(),
            value: config.value,
            rule_id: config.rule_id,
            group_name: config.group_name,
            is_user_in_experiment: config.is_user_in_experiment,
            is_experiment_active: config.is_experiment_active,
            is_device_based: config.is_device_based,
            secondary_exposures: config.secondary_exposures,
            evaluation_details,
        }
    }

    pub(crate) fn from_evaluation(
        name: &str,
        result: EvaluationResult,
        evaluation_details: EvaluationDetails,
    ) -> DynamicConfig {
        let value = match result.json_value {
            Value::Object(map) if !result.unsupported => map,
            _ => Map::new(),
        };
        DynamicConfig {
            name: name.to_owned(),
            value,
            rule_id: result.rule_id,
            group_name: result.group_name,
            is_user_in_experiment: result.is_experiment_group,
            is_experiment_active: result.is_experiment_active,
            is_device_based: false,
            secondary_exposures: result.secondary_exposures,
            evaluation_details,
        }
    }

    /// Typed value for `key`, or `None` if it's missing or of a different type.
    pub fn get<T: ConfigValue>(&self, key: &str) -> Option<T> {
        get_typed(&self.value, key, &self.name)
    }

    pub fn get_value<T: ConfigValue>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }
}

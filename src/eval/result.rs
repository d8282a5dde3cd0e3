use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record of a gate that was checked while evaluating another spec. Logged along with the
/// exposure of the outer spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecondaryExposure {
    pub gate: String,
    #[serde(rename = "gateValue")]
    pub gate_value: String,
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

impl SecondaryExposure {
    pub fn new(gate: impl Into<String>, gate_value: bool, rule_id: impl Into<String>) -> Self {
        SecondaryExposure {
            gate: gate.into(),
            gate_value: gate_value.to_string(),
            rule_id: rule_id.into(),
        }
    }
}

/// Uniform output of evaluating any spec or condition.
///
/// `unsupported` marks a result the engine could not compute. It must reach the caller as-is and
/// is never collapsed into `false`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluationResult {
    pub rule_id: String,
    pub bool_value: bool,
    pub json_value: Value,
    pub unsupported: bool,
    pub secondary_exposures: Vec<SecondaryExposure>,
    /// Exposures attributable to a layer itself rather than to its allocated experiment.
    pub undelegated_secondary_exposures: Vec<SecondaryExposure>,
    pub is_experiment_group: bool,
    pub group_name: Option<String>,
    pub explicit_parameters: Vec<String>,
    pub config_delegate: Option<String>,
    pub version: Option<i32>,
    pub is_experiment_active: bool,
}

impl EvaluationResult {
    pub(crate) fn boolean(value: bool, secondary_exposures: Vec<SecondaryExposure>) -> Self {
        EvaluationResult {
            bool_value: value,
            secondary_exposures,
            ..Default::default()
        }
    }

    pub(crate) fn disabled(default_value: Value, version: Option<i32>) -> Self {
        EvaluationResult {
            rule_id: "disabled".to_owned(),
            json_value: default_value,
            version,
            ..Default::default()
        }
    }

    pub(crate) fn spec_default(
        default_value: Value,
        secondary_exposures: Vec<SecondaryExposure>,
        version: Option<i32>,
    ) -> Self {
        EvaluationResult {
            rule_id: "default".to_owned(),
            json_value: default_value,
            undelegated_secondary_exposures: secondary_exposures.clone(),
            secondary_exposures,
            version,
            ..Default::default()
        }
    }

    pub(crate) fn unsupported(reason: &str) -> Self {
        log::debug!(target: "statsig", reason; "unsupported condition encountered");
        EvaluationResult {
            rule_id: "default".to_owned(),
            unsupported: true,
            ..Default::default()
        }
    }
}

use serde::Serialize;

use crate::{
    eval::{EvaluationResult, SecondaryExposure},
    evaluation_details::EvaluationDetails,
    response::ApiGate,
};

/// Result of checking a feature gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureGate {
    pub name: String,
    pub value: bool,
    pub rule_id: String,
    pub id_type: Option<String>,
    pub secondary_exposures: Vec<SecondaryExposure>,
    pub evaluation_details: EvaluationDetails,
}

impl FeatureGate {
    pub(crate) fn empty(name: &str, evaluation_details: EvaluationDetails) -> FeatureGate {
        FeatureGate {
            name: name.to_owned(),
            value: false,
            rule_id: String::new(),
            id_type: None,
            secondary_exposures: Vec::new(),
            evaluation_details,
        }
    }

    pub(crate) fn from_api(name: &str, gate: ApiGate, evaluation_details: EvaluationDetails) -> FeatureGate {
        FeatureGate {
            name: name.to_owned(),
            value: gate.value,
            rule_id: gate.rule_id,
            id_type: gate.id_type,
            secondary_exposures: gate.secondary_exposures,
            evaluation_details,
        }
    }

    pub(crate) fn from_evaluation(
        name: &str,
        id_type: Option<String>,
        result: EvaluationResult,
        evaluation_details: EvaluationDetails,
    ) -> FeatureGate {
        FeatureGate {
            name: name.to_owned(),
            value: !result.unsupported && result.bool_value,
            rule_id: result.rule_id,
            id_type,
            secondary_exposures: result.secondary_exposures,
            evaluation_details,
        }
    }
}

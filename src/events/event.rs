use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    eval::SecondaryExposure, now_millis, DynamicConfig, FeatureGate, Layer, StatsigUser,
};

/// Prefix of events generated by the SDK itself.
pub(crate) const STATSIG_PREFIX: &str = "statsig::";
pub(crate) const GATE_EXPOSURE: &str = "gate_exposure";
pub(crate) const CONFIG_EXPOSURE: &str = "config_exposure";
pub(crate) const LAYER_EXPOSURE: &str = "layer_exposure";

/// Custom event names longer than this are truncated.
pub(crate) const MAX_EVENT_NAME_LENGTH: usize = 64;

/// A single analytics event as submitted to the event endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Event {
    pub event_name: String,
    pub user: Value,
    /// Milliseconds since epoch.
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_exposures: Option<Vec<SecondaryExposure>>,
}

impl Event {
    fn new(
        user: &StatsigUser,
        event_name: String,
        value: Option<Value>,
        metadata: Option<HashMap<String, String>>,
        secondary_exposures: Option<Vec<SecondaryExposure>>,
    ) -> Event {
        Event {
            event_name,
            user: user.to_json(true),
            time: now_millis(),
            value,
            metadata,
            secondary_exposures,
        }
    }

    /// A caller-defined event. Returns `None` for an empty name.
    pub(crate) fn custom(
        user: &StatsigUser,
        name: &str,
        value: Option<Value>,
        metadata: Option<HashMap<String, String>>,
    ) -> Option<Event> {
        if name.is_empty() {
            return None;
        }
        let name = match name.char_indices().nth(MAX_EVENT_NAME_LENGTH) {
            Some((end, _)) => {
                log::warn!(target: "statsig", "event name is longer than {MAX_EVENT_NAME_LENGTH} characters and was truncated");
                &name[..end]
            }
            None => name,
        };
        Some(Event::new(user, name.to_owned(), value, metadata, None))
    }

    /// An SDK-generated event, named with the `statsig::` prefix.
    pub(crate) fn internal(
        user: &StatsigUser,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Event {
        Event::new(user, format!("{STATSIG_PREFIX}{name}"), None, Some(metadata), None)
    }

    pub(crate) fn gate_exposure(user: &StatsigUser, gate: &FeatureGate, is_manual: bool) -> Event {
        let mut metadata = HashMap::from([
            ("gate".to_owned(), gate.name.clone()),
            ("gateValue".to_owned(), gate.value.to_string()),
            ("ruleID".to_owned(), gate.rule_id.clone()),
        ]);
        gate.evaluation_details.add_to_metadata(&mut metadata);
        exposure(user, GATE_EXPOSURE, metadata, gate.secondary_exposures.clone(), is_manual)
    }

    pub(crate) fn config_exposure(user: &StatsigUser, config: &DynamicConfig, is_manual: bool) -> Event {
        let mut metadata = HashMap::from([
            ("config".to_owned(), config.name.clone()),
            ("ruleID".to_owned(), config.rule_id.clone()),
        ]);
        config.evaluation_details.add_to_metadata(&mut metadata);
        exposure(user, CONFIG_EXPOSURE, metadata, config.secondary_exposures.clone(), is_manual)
    }

    /// Exposure of one layer parameter. Explicit parameters are attributed to the allocated
    /// experiment.
    pub(crate) fn layer_exposure(user: &StatsigUser, layer: &Layer, parameter: &str, is_manual: bool) -> Event {
        let is_explicit = layer.is_explicit(parameter);
        let allocated_experiment = if is_explicit {
            layer.allocated_experiment_name.clone().unwrap_or_default()
        } else {
            String::new()
        };
        let mut metadata = HashMap::from([
            ("config".to_owned(), layer.name.clone()),
            ("ruleID".to_owned(), layer.rule_id.clone()),
            ("allocatedExperiment".to_owned(), allocated_experiment),
            ("parameterName".to_owned(), parameter.to_owned()),
            ("isExplicitParameter".to_owned(), is_explicit.to_string()),
        ]);
        layer.evaluation_details.add_to_metadata(&mut metadata);
        exposure(user, LAYER_EXPOSURE, metadata, layer.exposures_for(parameter).to_vec(), is_manual)
    }
}

fn exposure(
    user: &StatsigUser,
    name: &str,
    mut metadata: HashMap<String, String>,
    secondary_exposures: Vec<SecondaryExposure>,
    is_manual: bool,
) -> Event {
    if is_manual {
        metadata.insert("isManualExposure".to_owned(), "true".to_owned());
    }
    Event::new(
        user,
        format!("{STATSIG_PREFIX}{name}"),
        None,
        Some(metadata),
        Some(secondary_exposures),
    )
}

use std::{collections::HashMap, sync::RwLock, time::Duration};

use crate::{DynamicConfig, FeatureGate, Layer};

/// Identical exposures are logged at most once per window.
pub(crate) const DEDUPE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Past this size, expired keys are dropped on insert.
const PRUNE_THRESHOLD: usize = 1000;

/// Time-windowed set of recently logged exposures.
///
/// The check and the insert are separate steps, so two racing callers may both log the same
/// exposure. That's acceptable.
#[derive(Debug, Default)]
pub(crate) struct ExposureDedupe {
    logged_at: RwLock<HashMap<String, u64>>,
}

impl ExposureDedupe {
    pub(crate) fn new() -> ExposureDedupe {
        ExposureDedupe::default()
    }

    /// Returns `true` if `key` wasn't logged within the window ending at `now` (milliseconds), and
    /// records it as logged.
    pub(crate) fn should_log(&self, key: String, now: u64) -> bool {
        let window = DEDUPE_WINDOW.as_millis() as u64;
        {
            let logged_at = self
                .logged_at
                .read()
                .expect("thread holding exposure dedupe lock should not panic");
            if logged_at
                .get(&key)
                .is_some_and(|last| now.saturating_sub(*last) < window)
            {
                return false;
            }
        }

        let mut logged_at = self
            .logged_at
            .write()
            .expect("thread holding exposure dedupe lock should not panic");
        if logged_at.len() >= PRUNE_THRESHOLD {
            logged_at.retain(|_, last| now.saturating_sub(*last) < window);
        }
        logged_at.insert(key, now);
        true
    }

    /// Forget everything. Called when the user changes.
    pub(crate) fn clear(&self) {
        self.logged_at
            .write()
            .expect("thread holding exposure dedupe lock should not panic")
            .clear();
    }
}

pub(crate) fn gate_key(gate: &FeatureGate) -> String {
    [
        gate.name.as_str(),
        if gate.value { "true" } else { "false" },
        gate.rule_id.as_str(),
        &gate.evaluation_details.detailed_reason(),
    ]
    .join("|")
}

pub(crate) fn config_key(config: &DynamicConfig) -> String {
    [
        config.name.as_str(),
        config.rule_id.as_str(),
        &config.evaluation_details.detailed_reason(),
    ]
    .join("|")
}

pub(crate) fn layer_key(layer: &Layer, parameter: &str) -> String {
    let is_explicit = layer.is_explicit(parameter);
    let allocated_experiment = if is_explicit {
        layer.allocated_experiment_name.as_deref().unwrap_or_default()
    } else {
        ""
    };
    [
        layer.name.as_str(),
        layer.rule_id.as_str(),
        allocated_experiment,
        parameter,
        if is_explicit { "true" } else { "false" },
        &layer.evaluation_details.detailed_reason(),
    ]
    .join("|")
}

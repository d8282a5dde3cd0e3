//! Local evaluation of a specs payload, used in place of server-computed values when it is at
//! least as fresh.
use std::sync::Arc;

use crate::{
    dynamic_config::DynamicConfig,
    eval::{EvaluationResult, Evaluator},
    evaluation_details::{EvaluationDetails, EvaluationReason, EvaluationSource},
    feature_gate::FeatureGate,
    layer::Layer,
    now_millis,
    parameter_store::ParameterStore,
    specs::{SpecKind, Specs},
    Result, StatsigUser,
};

/// Evaluates gates, configs, experiments and layers from a specs download without any network
/// round trip.
///
/// # Examples
/// ```
/// # use statsig::OnDeviceEvaluator;
/// let evaluator = OnDeviceEvaluator::from_json(
///     r#"{"feature_gates": [], "dynamic_configs": [], "layer_configs": [], "time": 1}"#,
/// )
/// .unwrap();
/// assert_eq!(evaluator.lcut(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct OnDeviceEvaluator {
    evaluator: Evaluator,
    received_at: u64,
}

impl OnDeviceEvaluator {
    /// Parse a specs payload. Individual malformed specs are skipped.
    pub fn from_json(payload: &str) -> Result<OnDeviceEvaluator> {
        Ok(OnDeviceEvaluator::from_specs(Specs::from_json(payload)?))
    }

    pub fn from_specs(specs: Specs) -> OnDeviceEvaluator {
        OnDeviceEvaluator {
            evaluator: Evaluator::new(Arc::new(specs)),
            received_at: now_millis(),
        }
    }

    /// Last config update time of the specs.
    pub fn lcut(&self) -> u64 {
        self.evaluator.specs().time()
    }

    fn details(&self, result: &EvaluationResult) -> EvaluationDetails {
        let reason = if result.unsupported {
            EvaluationReason::Unsupported
        } else {
            EvaluationReason::Recognized
        };
        EvaluationDetails::new(
            EvaluationSource::Bootstrap,
            reason,
            Some(self.lcut()),
            Some(self.received_at),
        )
    }

    pub(crate) fn gate(&self, user: &StatsigUser, name: &str) -> Option<FeatureGate> {
        let result = self.evaluator.evaluate(SpecKind::Gate, name, user)?;
        let id_type = self
            .evaluator
            .specs()
            .get(SpecKind::Gate, name)
            .map(|spec| spec.id_type.clone());
        let details = self.details(&result);
        Some(FeatureGate::from_evaluation(name, id_type, result, details))
    }

    pub(crate) fn config(&self, user: &StatsigUser, name: &str) -> Option<DynamicConfig> {
        let result = self.evaluator.evaluate(SpecKind::Config, name, user)?;
        let details = self.details(&result);
        Some(DynamicConfig::from_evaluation(name, result, details))
    }

    pub(crate) fn layer(&self, user: &StatsigUser, name: &str) -> Option<Layer> {
        let result = self.evaluator.evaluate(SpecKind::Layer, name, user)?;
        let details = self.details(&result);
        Some(Layer::from_evaluation(name, result, details))
    }

    pub(crate) fn param_store(&self, name: &str) -> Option<ParameterStore> {
        let spec = self.evaluator.specs().param_store(name)?;
        let details = EvaluationDetails::new(
            EvaluationSource::Bootstrap,
            EvaluationReason::Recognized,
            Some(self.lcut()),
            Some(self.received_at),
        );
        Some(ParameterStore::new(name, spec.parameters.clone(), details))
    }
}

/// Whether an on-device result with `on_device_lcut` should replace one backed by `cached_lcut`.
pub(crate) fn prefer_on_device(cached_lcut: Option<u64>, on_device_lcut: Option<u64>) -> bool {
    match (cached_lcut, on_device_lcut) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(cached), Some(on_device)) => on_device >= cached,
    }
}

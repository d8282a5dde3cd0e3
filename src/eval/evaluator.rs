use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::{
    sharder::{percentage_bucket, user_bucket},
    specs::{Spec, SpecCondition, SpecKind, SpecRule, Specs},
    StatsigUser,
};

use super::{
    comparison::{as_string, ConditionOperator},
    result::{EvaluationResult, SecondaryExposure},
};

/// Maximum depth of nested gate and delegate evaluation. Exceeding it yields an unsupported
/// result, which also guards against reference cycles in server-authored specs.
pub const MAX_EVALUATION_DEPTH: usize = 64;

/// Gates whose name starts with this prefix are internal segments and don't produce secondary
/// exposures.
const SEGMENT_PREFIX: &str = "segment:";

/// Evaluates specs from an immutable [`Specs`] arena. Evaluation is pure CPU work.
#[derive(Debug, Clone)]
pub struct Evaluator {
    specs: Arc<Specs>,
}

impl Evaluator {
    pub fn new(specs: Arc<Specs>) -> Evaluator {
        Evaluator { specs }
    }

    pub fn specs(&self) -> &Specs {
        &self.specs
    }

    /// Evaluate the named spec. Returns `None` if there is no such spec.
    pub fn evaluate(&self, kind: SpecKind, name: &str, user: &StatsigUser) -> Option<EvaluationResult> {
        let spec = self.specs.get(kind, name)?;
        let result = self.eval_spec(spec, user, 0);
        log::trace!(target: "statsig", name, rule_id = result.rule_id.as_str(); "evaluated spec");
        Some(result)
    }

    fn eval_spec(&self, spec: &Spec, user: &StatsigUser, depth: usize) -> EvaluationResult {
        if depth > MAX_EVALUATION_DEPTH {
            return EvaluationResult::unsupported("maximum evaluation depth exceeded");
        }
        if !spec.enabled {
            return EvaluationResult::disabled(spec.default_value.clone(), spec.version);
        }

        let mut exposures = Vec::new();
        for rule in &spec.rules {
            let result = self.eval_rule(rule, user, depth);
            if result.unsupported {
                return result;
            }
            exposures.extend(result.secondary_exposures);
            if !result.bool_value {
                continue;
            }

            if let Some(delegated) = self.eval_delegate(rule, user, &exposures, depth) {
                return delegated;
            }

            let pass = eval_pass_percentage(rule, &spec.salt, user);
            return EvaluationResult {
                rule_id: rule.id.clone(),
                bool_value: pass,
                json_value: if pass {
                    result.json_value
                } else {
                    spec.default_value.clone()
                },
                undelegated_secondary_exposures: exposures.clone(),
                secondary_exposures: exposures,
                is_experiment_group: result.is_experiment_group,
                group_name: result.group_name,
                version: spec.version,
                is_experiment_active: spec.is_active.unwrap_or(false),
                ..Default::default()
            };
        }

        EvaluationResult::spec_default(spec.default_value.clone(), exposures, spec.version)
    }

    fn eval_rule(&self, rule: &SpecRule, user: &StatsigUser, depth: usize) -> EvaluationResult {
        let mut exposures = Vec::new();
        let mut pass = true;
        for condition in &rule.conditions {
            let result = self.eval_condition(condition, user, depth);
            if result.unsupported {
                return result;
            }
            exposures.extend(result.secondary_exposures);
            if !result.bool_value {
                pass = false;
            }
        }
        EvaluationResult {
            rule_id: rule.id.clone(),
            bool_value: pass,
            json_value: rule.return_value.clone(),
            secondary_exposures: exposures,
            is_experiment_group: rule.is_experiment_group.unwrap_or(false),
            group_name: rule.group_name.clone(),
            ..Default::default()
        }
    }

    /// Evaluate the experiment a layer rule allocates to. Returns `None` if the rule doesn't
    /// delegate or the delegate doesn't exist.
    fn eval_delegate(
        &self,
        rule: &SpecRule,
        user: &StatsigUser,
        exposures: &[SecondaryExposure],
        depth: usize,
    ) -> Option<EvaluationResult> {
        let delegate = rule.config_delegate.as_ref()?;
        let spec = self.specs.get(SpecKind::Config, delegate)?;

        let result = self.eval_spec(spec, user, depth + 1);
        let mut secondary_exposures = exposures.to_vec();
        secondary_exposures.extend(result.secondary_exposures);
        Some(EvaluationResult {
            rule_id: result.rule_id,
            bool_value: result.bool_value,
            json_value: result.json_value,
            unsupported: result.unsupported,
            secondary_exposures,
            undelegated_secondary_exposures: exposures.to_vec(),
            is_experiment_group: result.is_experiment_group,
            group_name: result.group_name,
            explicit_parameters: spec.explicit_parameters.clone().unwrap_or_default(),
            config_delegate: Some(delegate.clone()),
            version: result.version,
            is_experiment_active: spec.is_active.unwrap_or(false),
        })
    }

    fn eval_condition(
        &self,
        condition: &SpecCondition,
        user: &StatsigUser,
        depth: usize,
    ) -> EvaluationResult {
        let condition_type = condition.condition_type.to_lowercase();
        let target = condition.target_value.as_ref();

        let value: Option<Value> = match condition_type.as_str() {
            "public" => return EvaluationResult::boolean(true, Vec::new()),

            "pass_gate" | "fail_gate" => {
                let name = target.and_then(as_string).unwrap_or_default();
                let result = self.eval_nested_gate(&name, user, depth);
                if result.unsupported {
                    return result;
                }
                let pass = if condition_type == "fail_gate" {
                    !result.bool_value
                } else {
                    result.bool_value
                };
                return EvaluationResult::boolean(pass, result.secondary_exposures);
            }

            "multi_pass_gate" | "multi_fail_gate" => {
                let Some(Value::Array(names)) = target else {
                    return EvaluationResult::unsupported("multi gate target is not an array");
                };
                return self.eval_nested_gates(names, condition_type == "multi_pass_gate", user, depth);
            }

            "user_field" | "ip_based" | "ua_based" => user.get_user_value(condition.field.as_deref()),

            "environment_field" => user.get_from_environment(condition.field.as_deref()),

            "current_time" => Some(Value::from(Utc::now().timestamp_millis())),

            "user_bucket" => {
                let salt = condition
                    .additional_values
                    .as_ref()
                    .and_then(|values| values.get("salt"))
                    .and_then(as_string)
                    .unwrap_or_default();
                let unit_id = user.get_unit_id(&condition.id_type).unwrap_or_default();
                Some(Value::from(user_bucket(&format!("{salt}.{unit_id}"))))
            }

            "unit_id" => user.get_unit_id(&condition.id_type).map(Value::String),

            other => return EvaluationResult::unsupported(other),
        };

        let Some(operator) = condition.operator.as_deref().and_then(ConditionOperator::parse) else {
            return EvaluationResult::unsupported(condition.operator.as_deref().unwrap_or("missing operator"));
        };

        EvaluationResult::boolean(operator.eval(value.as_ref(), target), Vec::new())
    }

    fn eval_nested_gates(
        &self,
        names: &[Value],
        pass_on: bool,
        user: &StatsigUser,
        depth: usize,
    ) -> EvaluationResult {
        let mut exposures = Vec::new();
        let mut pass = false;
        for name in names {
            let Some(name) = name.as_str() else {
                return EvaluationResult::unsupported("expected gate name to be a string");
            };
            let result = self.eval_nested_gate(name, user, depth);
            if result.unsupported {
                return result;
            }
            exposures.extend(result.secondary_exposures);
            if result.bool_value == pass_on {
                pass = true;
                break;
            }
        }
        EvaluationResult::boolean(pass, exposures)
    }

    fn eval_nested_gate(&self, name: &str, user: &StatsigUser, depth: usize) -> EvaluationResult {
        let gate = self
            .specs
            .get(SpecKind::Gate, name)
            .map(|spec| self.eval_spec(spec, user, depth + 1));
        if let Some(gate) = &gate {
            if gate.unsupported {
                return gate.clone();
            }
        }

        let value = gate.as_ref().is_some_and(|g| g.bool_value);
        let mut exposures = gate
            .as_ref()
            .map(|g| g.secondary_exposures.clone())
            .unwrap_or_default();
        if !name.starts_with(SEGMENT_PREFIX) {
            let rule_id = gate.as_ref().map(|g| g.rule_id.as_str()).unwrap_or_default();
            exposures.push(SecondaryExposure::new(name, value, rule_id));
        }
        EvaluationResult::boolean(value, exposures)
    }
}

fn eval_pass_percentage(rule: &SpecRule, spec_salt: &str, user: &StatsigUser) -> bool {
    let unit_id = user.get_unit_id(&rule.id_type).unwrap_or_default();
    let bucket = percentage_bucket(&format!("{spec_salt}.{}.{unit_id}", rule.salt));
    (bucket as f64) < rule.pass_percentage * 100.0
}

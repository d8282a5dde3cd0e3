//! Local evaluation of gate, config, experiment and layer specs.
//!
//! [`Evaluator`] walks a spec's ordered rules against a [`StatsigUser`](crate::StatsigUser),
//! resolving nested gates and layer delegation recursively. Each rule's conditions are checked
//! with [`ConditionOperator`]s; a passing rule then goes through a deterministic percentage
//! rollout computed by the [sharder](crate::sharder).
//!
//! Conditions or operators the engine does not know produce an [`EvaluationResult`] with
//! `unsupported` set instead of a `false`, so callers can tell the two apart.
mod comparison;
mod evaluator;
mod result;

pub use comparison::ConditionOperator;
pub use evaluator::{Evaluator, MAX_EVALUATION_DEPTH};
pub use result::{EvaluationResult, SecondaryExposure};

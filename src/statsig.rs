//! Process-wide client instance with a start/update/shutdown lifecycle.
//!
//! A thin facade over [`StatsigClient`]. Before [`start`] and after [`shutdown`], evaluation
//! functions return defaults with source [`EvaluationSource::Uninitialized`](crate::EvaluationSource::Uninitialized).
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde_json::Value;

use crate::{
    DynamicConfig, Error, EvaluationDetails, FeatureGate, Layer, Result,
    StatsigClient, StatsigOptions, StatsigUser,
};

static CLIENT_INSTANCE: RwLock<Option<Arc<StatsigClient>>> = RwLock::new(None);

/// Create the shared client. A client started earlier is shut down and replaced.
pub fn start(sdk_key: &str, user: StatsigUser, options: StatsigOptions) -> Result<Arc<StatsigClient>> {
    let client = Arc::new(StatsigClient::new(sdk_key, user, options)?);

    // minimizing the scope of holding the write lock
    let existing = {
        let mut instance = CLIENT_INSTANCE.write().map_err(|_| Error::ThreadPanicked)?;
        std::mem::replace(&mut *instance, Some(Arc::clone(&client)))
    };
    if let Some(existing) = existing {
        log::debug!(target: "statsig", "replacing previously started client");
        existing.shutdown();
    }
    Ok(client)
}

/// The shared client, if [`start`] was called.
pub fn instance() -> Option<Arc<StatsigClient>> {
    CLIENT_INSTANCE.read().ok()?.clone()
}

/// Shut down and release the shared client.
pub fn shutdown() {
    let existing = match CLIENT_INSTANCE.write() {
        Ok(mut instance) => instance.take(),
        Err(_) => return,
    };
    if let Some(existing) = existing {
        existing.shutdown();
    }
}

/// Switch the shared client to `user`.
///
/// # Errors
///
/// [`Error::ShutDown`] if no client was started.
pub fn update_user(user: StatsigUser) -> Result<()> {
    instance().ok_or(Error::ShutDown)?.update_user(user)
}

pub fn check_gate(name: &str) -> bool {
    instance().is_some_and(|client| client.check_gate(name))
}

pub fn get_feature_gate(name: &str) -> FeatureGate {
    match instance() {
        Some(client) => client.get_feature_gate(name),
        None => FeatureGate::empty(name, not_started()),
    }
}

pub fn get_config(name: &str) -> DynamicConfig {
    match instance() {
        Some(client) => client.get_config(name),
        None => DynamicConfig::empty(name, not_started()),
    }
}

pub fn get_experiment(name: &str, keep_device_value: bool) -> DynamicConfig {
    match instance() {
        Some(client) => client.get_experiment(name, keep_device_value),
        None => DynamicConfig::empty(name, not_started()),
    }
}

pub fn get_layer(name: &str, keep_device_value: bool) -> Layer {
    match instance() {
        Some(client) => client.get_layer(name, keep_device_value),
        None => Layer::empty(name, not_started()),
    }
}

pub fn log_event(name: &str, value: Option<Value>, metadata: Option<HashMap<String, String>>) {
    match instance() {
        Some(client) => client.log_event(name, value, metadata),
        None => log::warn!(target: "statsig", "event dropped: client not started"),
    }
}

fn not_started() -> EvaluationDetails {
    EvaluationDetails::uninitialized()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{response::InitializeResponse, EvaluationSource};

    fn options() -> StatsigOptions {
        let values: InitializeResponse = serde_json::from_value(serde_json::json!({
            "has_updates": true,
            "time": 1,
            "hash_used": "djb2",
            "feature_gates": {
                crate::hashing::djb2("a_gate"): {"name": "a_gate", "value": true, "rule_id": "r1"}
            }
        }))
        .unwrap();
        StatsigOptions::new()
            .with_api_url("http://127.0.0.1:1")
            .with_error_reporting_disabled(true)
            .with_shutdown_timeout(Duration::from_millis(100))
            .with_initialize_values(values)
    }

    // One test so parallel tests never race on the shared instance.
    #[test]
    fn lifecycle() {
        assert!(!check_gate("a_gate"));
        assert_eq!(
            get_feature_gate("a_gate").evaluation_details.source,
            EvaluationSource::Uninitialized
        );
        assert!(matches!(update_user(StatsigUser::new()), Err(Error::ShutDown)));

        let first = start("client-key", StatsigUser::with_user_id("a"), options()).unwrap();
        assert!(check_gate("a_gate"));
        assert_eq!(get_layer("missing", false).evaluation_details.source, EvaluationSource::Bootstrap);

        let second = start("client-key", StatsigUser::with_user_id("a"), options()).unwrap();
        assert!(Arc::ptr_eq(&instance().unwrap(), &second));
        assert!(matches!(first.update_user(StatsigUser::new()), Err(Error::ShutDown)));

        shutdown();
        assert!(instance().is_none());
        assert!(!check_gate("a_gate"));
    }
}

//! Client SDK for Statsig: feature gates, dynamic configs, experiments and layers.
//!
//! # Overview
//!
//! A [`StatsigClient`] fetches precomputed values for one [`StatsigUser`] at a time and evaluates
//! gates ([`FeatureGate`]), configs and experiments ([`DynamicConfig`]), layers ([`Layer`]) and
//! parameter stores ([`ParameterStore`]) locally. Values are cached per user in a pluggable
//! [`KeyValueStorage`], so a restarted client can serve the last known values before the network
//! answers. Exposures and custom events are batched and sent in the background.
//!
//! [`statsig`] offers the same API on a process-wide instance.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Evaluations never fail. Until values arrive, or for names the server doesn't know, they return
//! defaults whose [`EvaluationDetails`] explain why (`Uninitialized`, `NoValues`, `Unrecognized`).
//! Errors are only returned from lifecycle calls such as [`StatsigClient::new`] and
//! [`StatsigClient::wait_for_initialization`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `statsig` target.
//! Consider integrating a `log`-compatible logger implementation for better visibility into SDK
//! operations.

#![warn(rustdoc::missing_crate_level_docs)]

mod bootstrap;
mod client;
mod diagnostics;
mod dynamic_config;
mod error;
mod error_boundary;
pub mod eval;
mod evaluation_details;
mod events;
mod feature_gate;
pub mod hashing;
mod layer;
mod network;
mod on_device;
mod options;
mod overrides;
mod parameter_store;
mod poller;
mod response;
mod sdk_key;
pub mod sharder;
pub mod specs;
pub mod statsig;
mod storage;
mod store;
mod user;
mod user_cache_key;
mod value;
mod values_cache;

use std::collections::BTreeMap;

pub use client::{StatsigClient, StatsigListening};
pub use diagnostics::{DiagnosticsRecorder, InMemoryDiagnostics, Marker, MarkerAction};
pub use dynamic_config::DynamicConfig;
pub use error::{Error, Result};
pub use evaluation_details::{EvaluationDetails, EvaluationReason, EvaluationSource};
pub use feature_gate::FeatureGate;
pub use layer::Layer;
pub use network::{Endpoint, DEFAULT_API_URL, DNS_QUERY_ENDPOINT};
pub use on_device::OnDeviceEvaluator;
pub use options::StatsigOptions;
pub use overrides::StatsigOverrides;
pub use parameter_store::ParameterStore;
pub use response::{ApiConfig, ApiGate, InitializeResponse, SdkFlags};
pub use storage::{FileStorage, InMemoryStorage, KeyValueStorage};
pub use user::StatsigUser;
pub use user_cache_key::{CustomCacheKeyFn, UserCacheKey};
pub use value::ConfigValue;

/// Reported to the server as `sdkType`.
pub const SDK_TYPE: &str = "rust-client";
/// Reported to the server as `sdkVersion`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// SDK identification attached to requests that aren't made on behalf of a user.
pub(crate) fn statsig_metadata() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([("sdkType", SDK_TYPE), ("sdkVersion", SDK_VERSION)])
}

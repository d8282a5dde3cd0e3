use std::{fmt, sync::Arc, time::Duration};

use crate::{
    diagnostics::DiagnosticsRecorder,
    on_device::OnDeviceEvaluator,
    response::InitializeResponse,
    storage::{InMemoryStorage, KeyValueStorage},
    user_cache_key::CustomCacheKeyFn,
};

/// Configuration for [`StatsigClient`](crate::StatsigClient).
///
/// ```
/// # use std::time::Duration;
/// # use statsig::StatsigOptions;
/// let options = StatsigOptions::new()
///     .with_init_timeout(Duration::from_secs(1))
///     .with_environment("staging")
///     .with_auto_value_update(true);
/// ```
#[derive(Clone)]
pub struct StatsigOptions {
    /// How long [`StatsigClient::wait_for_initialization`](crate::StatsigClient::wait_for_initialization)
    /// waits for the first fetch before reporting a timeout. The fetch itself keeps running.
    ///
    /// Defaults to [`StatsigOptions::DEFAULT_INIT_TIMEOUT`].
    pub init_timeout: Duration,
    /// Replaces the default API URL. Fallback URLs are never used with an override.
    pub api_url: Option<String>,
    /// Periodically re-fetch values for the current user.
    pub enable_auto_value_update: bool,
    pub auto_value_update_interval: Duration,
    /// Randomized amount subtracted from each auto update interval.
    pub auto_value_update_jitter: Duration,
    pub override_stable_id: Option<String>,
    /// Values to initialize from synchronously, skipping the initial network fetch.
    pub initialize_values: Option<InitializeResponse>,
    /// Send and look up plain names instead of hashed ones.
    pub disable_hashing: bool,
    pub disable_compression: bool,
    /// Environment tier, e.g. `"staging"`. Added to every user.
    pub environment: Option<String>,
    pub event_flush_interval: Duration,
    pub event_queue_max_size: usize,
    pub storage: Arc<dyn KeyValueStorage>,
    pub on_device_specs: Option<Arc<OnDeviceEvaluator>>,
    pub custom_cache_key: Option<CustomCacheKeyFn>,
    /// Discover alternate domains through DNS when the API domain is unreachable.
    pub fallback_enabled: bool,
    /// Delay before the first retry. Doubles on every further retry.
    pub retry_backoff: Duration,
    /// Retries for initialize requests.
    pub max_retries: u32,
    /// Upper bound on a single HTTP request, from connecting until the body is read.
    pub request_timeout: Duration,
    /// A connect that takes longer counts as the domain being unreachable.
    pub connect_timeout: Duration,
    /// Upper bound on how long shutdown waits for pending events to be sent.
    pub shutdown_timeout: Duration,
    pub diagnostics: Option<Arc<dyn DiagnosticsRecorder>>,
    /// Don't report internal errors to the SDK exception endpoint.
    pub disable_error_reporting: bool,
}

impl StatsigOptions {
    /// Default value for [`StatsigOptions::init_timeout`].
    pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(3);
    /// Default value for [`StatsigOptions::auto_value_update_interval`].
    pub const DEFAULT_AUTO_VALUE_UPDATE_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`StatsigOptions::auto_value_update_jitter`].
    pub const DEFAULT_AUTO_VALUE_UPDATE_JITTER: Duration = Duration::from_secs(1);
    /// Default value for [`StatsigOptions::event_flush_interval`].
    pub const DEFAULT_EVENT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`StatsigOptions::event_queue_max_size`].
    pub const DEFAULT_EVENT_QUEUE_MAX_SIZE: usize = 50;
    /// Default value for [`StatsigOptions::retry_backoff`].
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
    /// Default value for [`StatsigOptions::max_retries`].
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Default value for [`StatsigOptions::request_timeout`].
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for [`StatsigOptions::connect_timeout`].
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default value for [`StatsigOptions::shutdown_timeout`].
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new() -> StatsigOptions {
        StatsigOptions::default()
    }

    pub fn with_init_timeout(mut self, init_timeout: Duration) -> StatsigOptions {
        self.init_timeout = init_timeout;
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> StatsigOptions {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn with_auto_value_update(mut self, enabled: bool) -> StatsigOptions {
        self.enable_auto_value_update = enabled;
        self
    }

    pub fn with_auto_value_update_interval(mut self, interval: Duration) -> StatsigOptions {
        self.auto_value_update_interval = interval;
        self
    }

    pub fn with_auto_value_update_jitter(mut self, jitter: Duration) -> StatsigOptions {
        self.auto_value_update_jitter = jitter;
        self
    }

    pub fn with_stable_id(mut self, stable_id: impl Into<String>) -> StatsigOptions {
        self.override_stable_id = Some(stable_id.into());
        self
    }

    pub fn with_initialize_values(mut self, values: InitializeResponse) -> StatsigOptions {
        self.initialize_values = Some(values);
        self
    }

    pub fn with_hashing_disabled(mut self, disabled: bool) -> StatsigOptions {
        self.disable_hashing = disabled;
        self
    }

    pub fn with_compression_disabled(mut self, disabled: bool) -> StatsigOptions {
        self.disable_compression = disabled;
        self
    }

    pub fn with_environment(mut self, tier: impl Into<String>) -> StatsigOptions {
        self.environment = Some(tier.into());
        self
    }

    pub fn with_event_flush_interval(mut self, interval: Duration) -> StatsigOptions {
        self.event_flush_interval = interval;
        self
    }

    pub fn with_event_queue_max_size(mut self, size: usize) -> StatsigOptions {
        self.event_queue_max_size = size;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> StatsigOptions {
        self.storage = storage;
        self
    }

    pub fn with_on_device_specs(mut self, evaluator: OnDeviceEvaluator) -> StatsigOptions {
        self.on_device_specs = Some(Arc::new(evaluator));
        self
    }

    pub fn with_custom_cache_key(mut self, custom: CustomCacheKeyFn) -> StatsigOptions {
        self.custom_cache_key = Some(custom);
        self
    }

    pub fn with_fallback_enabled(mut self, enabled: bool) -> StatsigOptions {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> StatsigOptions {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> StatsigOptions {
        self.max_retries = max_retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> StatsigOptions {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> StatsigOptions {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> StatsigOptions {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_diagnostics(mut self, recorder: Arc<dyn DiagnosticsRecorder>) -> StatsigOptions {
        self.diagnostics = Some(recorder);
        self
    }

    pub fn with_error_reporting_disabled(mut self, disabled: bool) -> StatsigOptions {
        self.disable_error_reporting = disabled;
        self
    }
}

impl Default for StatsigOptions {
    fn default() -> StatsigOptions {
        StatsigOptions {
            init_timeout: StatsigOptions::DEFAULT_INIT_TIMEOUT,
            api_url: None,
            enable_auto_value_update: false,
            auto_value_update_interval: StatsigOptions::DEFAULT_AUTO_VALUE_UPDATE_INTERVAL,
            auto_value_update_jitter: StatsigOptions::DEFAULT_AUTO_VALUE_UPDATE_JITTER,
            override_stable_id: None,
            initialize_values: None,
            disable_hashing: false,
            disable_compression: false,
            environment: None,
            event_flush_interval: StatsigOptions::DEFAULT_EVENT_FLUSH_INTERVAL,
            event_queue_max_size: StatsigOptions::DEFAULT_EVENT_QUEUE_MAX_SIZE,
            storage: Arc::new(InMemoryStorage::new()),
            on_device_specs: None,
            custom_cache_key: None,
            fallback_enabled: true,
            retry_backoff: StatsigOptions::DEFAULT_RETRY_BACKOFF,
            max_retries: StatsigOptions::DEFAULT_MAX_RETRIES,
            request_timeout: StatsigOptions::DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: StatsigOptions::DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: StatsigOptions::DEFAULT_SHUTDOWN_TIMEOUT,
            diagnostics: None,
            disable_error_reporting: false,
        }
    }
}

impl fmt::Debug for StatsigOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsigOptions")
            .field("init_timeout", &self.init_timeout)
            .field("api_url", &self.api_url)
            .field("enable_auto_value_update", &self.enable_auto_value_update)
            .field("auto_value_update_interval", &self.auto_value_update_interval)
            .field("disable_hashing", &self.disable_hashing)
            .field("disable_compression", &self.disable_compression)
            .field("environment", &self.environment)
            .field("event_flush_interval", &self.event_flush_interval)
            .field("event_queue_max_size", &self.event_queue_max_size)
            .field("fallback_enabled", &self.fallback_enabled)
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, RwLock,
    },
    time::Duration,
};

use serde_json::{Map, Value};
use tokio::{
    runtime::{Handle, Runtime},
    task::AbortHandle,
};
use uuid::Uuid;

use crate::{
    bootstrap,
    diagnostics::Diagnostics,
    error_boundary::{ErrorBoundary, DEFAULT_EXCEPTION_URL},
    events::{config_key, gate_key, layer_key, Event, EventLogger, EventLoggerConfig, ExposureDedupe},
    hashing::HashAlgorithm,
    network::{
        fallback_resolver::FallbackResolver,
        sync_client::{SyncClient, SyncClientConfig},
        DEFAULT_API_URL, DNS_QUERY_ENDPOINT,
    },
    now_millis,
    overrides::StatsigOverrides,
    poller::{PollerThread, PollerThreadConfig},
    response::InitializeResponse,
    sdk_key::{validate_client_key, validate_response_key},
    storage::KeyValueStorage,
    store::Store,
    user_cache_key::UserCacheKey,
    DynamicConfig, Error, EvaluationDetails, EvaluationSource, FeatureGate, Layer, ParameterStore,
    Result, StatsigOptions, StatsigUser,
};

/// Storage key of the device stable ID.
pub(crate) const STABLE_ID_STORAGE_KEY: &str = "com.Statsig.InternalStore.stableIDKey";
const FETCH_VALUES_FAILED: &str = "fetch_values_failed";

/// Callbacks for client lifecycle events. Both methods default to doing nothing.
pub trait StatsigListening: Send + Sync {
    /// Called once initialization finished. `error` is set if it failed.
    fn on_initialized(&self, _error: Option<&Error>) {}

    /// Called when values for a new user were fetched after
    /// [`StatsigClient::update_user`].
    fn on_user_updated(&self, _error: Option<&Error>) {}
}

/// A result that becomes available once, and threads that wait for it.
struct Completion {
    result: Mutex<Option<Result<()>>>,
    ready: Condvar,
}

impl Completion {
    fn new() -> Completion {
        Completion {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Returns `false` if a result was already set. The first result wins.
    fn set(&self, result: Result<()>) -> bool {
        let mut lock = self
            .result
            .lock()
            .expect("thread holding completion lock should not panic");
        if lock.is_some() {
            return false;
        }
        *lock = Some(result);
        self.ready.notify_all();
        true
    }

    fn get(&self) -> Option<Result<()>> {
        self.result
            .lock()
            .expect("thread holding completion lock should not panic")
            .clone()
    }

    fn wait(&self, timeout: Duration) -> Result<()> {
        let lock = self.result.lock().map_err(|_| Error::ThreadPanicked)?;
        let (lock, _) = self
            .ready
            .wait_timeout_while(lock, timeout, |result| result.is_none())
            .map_err(|_| Error::ThreadPanicked)?;
        (*lock).clone().unwrap_or(Err(Error::Timeout))
    }
}

type FetchCallback = Box<dyn FnOnce(&Arc<ClientInner>, Result<()>) + Send>;

/// A fetch in flight, tagged with an id so a finished fetch only removes its own entry.
struct InFlightFetch {
    id: u64,
    task: AbortHandle,
    /// Called with the result. Carried over to the fetch that supersedes this one.
    waiters: Vec<FetchCallback>,
}

/// State shared between the client handle, background tasks, and the layers and parameter
/// stores it hands out.
pub(crate) struct ClientInner {
    sdk_key: String,
    options: StatsigOptions,
    runtime: Handle,
    hash: HashAlgorithm,
    user: RwLock<StatsigUser>,
    store: Store,
    sync: Arc<SyncClient>,
    logger: Arc<EventLogger>,
    dedupe: ExposureDedupe,
    error_boundary: Arc<ErrorBoundary>,
    diagnostics: Diagnostics,
    /// Fetch in flight per v2 cache key.
    in_flight: Mutex<HashMap<String, InFlightFetch>>,
    next_fetch_id: AtomicU64,
    initialized: Completion,
    listeners: RwLock<Vec<Arc<dyn StatsigListening>>>,
    shut_down: AtomicBool,
}

impl ClientInner {
    fn current_user(&self) -> StatsigUser {
        self.user
            .read()
            .expect("thread holding user lock should not panic")
            .clone()
    }

    fn listeners(&self) -> Vec<Arc<dyn StatsigListening>> {
        self.listeners
            .read()
            .expect("thread holding listeners lock should not panic")
            .clone()
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, InFlightFetch>> {
        self.in_flight
            .lock()
            .expect("thread holding in-flight lock should not panic")
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        Ok(())
    }

    pub(crate) fn check_gate_internal(&self, name: &str, log_exposure: bool) -> FeatureGate {
        let user = self.current_user();
        let gate = self.error_boundary.capture(
            "check_gate",
            || Ok(self.store.check_gate(&user, name)),
            || FeatureGate::empty(name, EvaluationDetails::uninitialized()),
        );
        log::trace!(target: "statsig", gate = name, value = gate.value; "checked gate");
        if log_exposure {
            self.log_gate_exposure(&user, &gate, false);
        }
        gate
    }

    pub(crate) fn get_config_internal(&self, name: &str, log_exposure: bool) -> DynamicConfig {
        let user = self.current_user();
        let config = self.error_boundary.capture(
            "get_config",
            || Ok(self.store.get_config(&user, name)),
            || DynamicConfig::empty(name, EvaluationDetails::uninitialized()),
        );
        if log_exposure {
            self.log_config_exposure(&user, &config, false);
        }
        config
    }

    pub(crate) fn get_experiment_internal(
        &self,
        name: &str,
        keep_device_value: bool,
        log_exposure: bool,
    ) -> DynamicConfig {
        let user = self.current_user();
        let experiment = self.error_boundary.capture(
            "get_experiment",
            || Ok(self.store.get_experiment(&user, name, keep_device_value)),
            || DynamicConfig::empty(name, EvaluationDetails::uninitialized()),
        );
        if log_exposure {
            self.log_config_exposure(&user, &experiment, false);
        }
        experiment
    }

    pub(crate) fn get_layer_internal(
        self: &Arc<Self>,
        name: &str,
        keep_device_value: bool,
        log_exposure: bool,
    ) -> Layer {
        let user = self.current_user();
        self.error_boundary
            .capture(
                "get_layer",
                || Ok(self.store.get_layer(&user, name, keep_device_value)),
                || Layer::empty(name, EvaluationDetails::uninitialized()),
            )
            .attach(self, log_exposure)
    }

    fn get_parameter_store_internal(self: &Arc<Self>, name: &str, log_exposure: bool) -> ParameterStore {
        self.error_boundary
            .capture(
                "get_parameter_store",
                || Ok(self.store.get_param_store(name)),
                || ParameterStore::new(name, Map::new(), EvaluationDetails::uninitialized()),
            )
            .attach(self, log_exposure)
    }

    fn log_gate_exposure(&self, user: &StatsigUser, gate: &FeatureGate, is_manual: bool) {
        if self.dedupe.should_log(gate_key(gate), now_millis()) {
            self.logger.log(Event::gate_exposure(user, gate, is_manual));
        }
    }

    fn log_config_exposure(&self, user: &StatsigUser, config: &DynamicConfig, is_manual: bool) {
        if self.dedupe.should_log(config_key(config), now_millis()) {
            self.logger.log(Event::config_exposure(user, config, is_manual));
        }
    }

    pub(crate) fn log_layer_exposure(&self, layer: &Layer, parameter: &str, is_manual: bool) {
        if self.dedupe.should_log(layer_key(layer, parameter), now_millis()) {
            let user = self.current_user();
            self.logger
                .log(Event::layer_exposure(&user, layer, parameter, is_manual));
        }
    }

    /// Fetch values for `user` in the background and call `on_done` with the result.
    ///
    /// A fetch already in flight for the same cache key is cancelled. Its callbacks are called
    /// with the result of this fetch instead.
    fn spawn_fetch(
        self: &Arc<Self>,
        user: StatsigUser,
        user_key: UserCacheKey,
        on_done: impl FnOnce(&Arc<ClientInner>, Result<()>) + Send + 'static,
    ) {
        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let cache_key = user_key.v2.clone();

        // Held across the spawn so the task can't finish before its entry is inserted.
        let mut in_flight = self.lock_in_flight();
        let mut waiters = match in_flight.remove(&cache_key) {
            Some(previous) => {
                log::debug!(target: "statsig", "cancelling superseded fetch");
                previous.task.abort();
                previous.waiters
            }
            None => Vec::new(),
        };
        waiters.push(Box::new(on_done));

        let inner = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            let result = inner.fetch_and_save(&user, &user_key).await;
            let waiters = {
                let mut in_flight = inner.lock_in_flight();
                match in_flight.get(&user_key.v2) {
                    Some(current) if current.id == id => in_flight
                        .remove(&user_key.v2)
                        .map(|fetch| fetch.waiters)
                        .unwrap_or_default(),
                    // superseded, the newer fetch took over the waiters
                    _ => Vec::new(),
                }
            };
            for waiter in waiters {
                waiter(&inner, result.clone());
            }
        });
        in_flight.insert(
            cache_key,
            InFlightFetch {
                id,
                task: task.abort_handle(),
                waiters,
            },
        );
    }

    /// Cancel every fetch in flight. Their callbacks get [`Error::ShutDown`].
    fn cancel_fetches(self: &Arc<Self>) {
        let cancelled: Vec<InFlightFetch> = self
            .lock_in_flight()
            .drain()
            .map(|(_, fetch)| fetch)
            .collect();
        for fetch in cancelled {
            fetch.task.abort();
            for waiter in fetch.waiters {
                waiter(self, Err(Error::ShutDown));
            }
        }
    }

    async fn fetch_and_save(&self, user: &StatsigUser, user_key: &UserCacheKey) -> Result<()> {
        let sync_state = self.store.sync_state(user_key);
        let result = self.sync.fetch_values(user, &sync_state, self.hash).await;
        let is_current = self.store.user_key().v2 == user_key.v2;
        match result {
            Ok(values) => {
                if values.has_updates {
                    self.logger
                        .set_compression_supported(values.sdk_flags.enable_log_event_compression);
                }
                self.store
                    .save_values(values, user_key, EvaluationSource::Network, now_millis());
                if is_current {
                    self.store.finish_loading();
                }
                Ok(())
            }
            Err(err) => {
                if is_current {
                    self.store.finish_loading();
                }
                if matches!(err, Error::SdkKeyMismatch) {
                    self.error_boundary.log_exception("fetch_values", &err);
                }
                let metadata = HashMap::from([("error".to_owned(), err.to_string())]);
                self.logger
                    .log(Event::internal(user, FETCH_VALUES_FAILED, metadata));
                Err(err)
            }
        }
    }

    /// Save bootstrap values for `user`. Values generated for another SDK key are discarded.
    fn apply_bootstrap(
        &self,
        user: &StatsigUser,
        user_key: &UserCacheKey,
        mut values: InitializeResponse,
    ) -> Result<()> {
        if let Err(err) = validate_response_key(&self.sdk_key, &values) {
            self.error_boundary.log_exception("initialize_values", &err);
            self.store.finish_loading();
            return Err(err);
        }

        let source = if bootstrap::is_valid(user, values.evaluated_keys.as_ref()) {
            EvaluationSource::Bootstrap
        } else {
            log::warn!(target: "statsig", "bootstrap values were generated for a different user");
            EvaluationSource::InvalidBootstrap
        };
        values.has_updates = true;
        self.logger
            .set_compression_supported(values.sdk_flags.enable_log_event_compression);
        self.store.save_values(values, user_key, source, now_millis());
        Ok(())
    }

    fn finish_initialization(&self, result: Result<()>) {
        if !self.initialized.set(result.clone()) {
            return;
        }
        self.diagnostics.overall_end(result.is_ok());
        match &result {
            Ok(()) => log::debug!(target: "statsig", "initialized"),
            Err(err) => log::warn!(target: "statsig", "initialization failed: {err}"),
        }
        for listener in self.listeners() {
            listener.on_initialized(result.as_ref().err());
        }
    }

    fn update_user(self: &Arc<Self>, user: StatsigUser) -> Result<()> {
        self.ensure_running()?;
        let user = normalize_user(user, &self.options);
        let user_key = UserCacheKey::from_user(&user, &self.sdk_key, self.options.custom_cache_key.as_ref());

        *self
            .user
            .write()
            .expect("thread holding user lock should not panic") = user.clone();
        self.store.set_user(user_key.clone());
        self.logger.set_user(user.clone());
        self.dedupe.clear();

        let completion = Arc::new(Completion::new());
        {
            let completion = Arc::clone(&completion);
            self.spawn_fetch(user, user_key, move |inner, result| {
                completion.set(result.clone());
                inner.finish_initialization(result.clone());
                for listener in inner.listeners() {
                    listener.on_user_updated(result.as_ref().err());
                }
            });
        }
        completion.wait(self.options.init_timeout)
    }

    /// Re-fetch values for the current user, waiting up to the init timeout.
    fn refresh(self: &Arc<Self>) -> Result<()> {
        self.ensure_running()?;
        let completion = Arc::new(Completion::new());
        {
            let completion = Arc::clone(&completion);
            self.spawn_fetch(self.current_user(), self.store.user_key(), move |_, result| {
                completion.set(result);
            });
        }
        completion.wait(self.options.init_timeout)
    }
}

/// Attach the stable ID, environment and SDK metadata to `user`.
fn normalize_user(mut user: StatsigUser, options: &StatsigOptions) -> StatsigUser {
    if let Some(tier) = &options.environment {
        user.statsig_environment
            .entry("tier".to_owned())
            .or_insert_with(|| tier.clone());
    }

    let storage: &dyn KeyValueStorage = options.storage.as_ref();
    let stable_id = options
        .override_stable_id
        .clone()
        .or_else(|| storage.get_string(STABLE_ID_STORAGE_KEY))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    storage.set_string(STABLE_ID_STORAGE_KEY, &stable_id);

    user.set_stable_id(stable_id);
    user.set_metadata("sdkType", crate::SDK_TYPE);
    user.set_metadata("sdkVersion", crate::SDK_VERSION);
    user
}

/// A Statsig client for one SDK key and one user at a time.
///
/// Creating a client starts fetching values for the user in the background. Evaluations never
/// block and never fail: before values arrive they return defaults whose
/// [`EvaluationDetails`] say why.
///
/// # Examples
/// ```no_run
/// # use statsig::{StatsigClient, StatsigOptions, StatsigUser};
/// let client = StatsigClient::new(
///     "client-key",
///     StatsigUser::with_user_id("a-user"),
///     StatsigOptions::new(),
/// )
/// .unwrap();
/// if let Err(err) = client.wait_for_initialization() {
///     eprintln!("using cached or default values: {err}");
/// }
/// if client.check_gate("new_homepage") {
///     // ...
/// }
/// client.shutdown();
/// ```
pub struct StatsigClient {
    inner: Arc<ClientInner>,
    poller: Mutex<Option<PollerThread>>,
    /// `None` only while dropping.
    runtime: Option<Runtime>,
}

impl StatsigClient {
    /// Create a client and start fetching values for `user`.
    ///
    /// With [`StatsigOptions::initialize_values`] set, the client initializes synchronously from
    /// those values instead.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSdkKey`] if `sdk_key` is empty or a server secret.
    /// - [`Error::Io`] if the background runtime could not be started.
    /// - [`Error::Network`] if the HTTP client could not be built.
    pub fn new(sdk_key: &str, user: StatsigUser, options: StatsigOptions) -> Result<StatsigClient> {
        validate_client_key(sdk_key)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("statsig-runtime")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let diagnostics = Diagnostics::new(options.diagnostics.clone());
        diagnostics.overall_start();

        // Client holds a connection pool internally, so we're sharing it between all requests.
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()?;
        let error_boundary = Arc::new(ErrorBoundary::new(
            sdk_key,
            DEFAULT_EXCEPTION_URL,
            http.clone(),
            (!options.disable_error_reporting).then(|| handle.clone()),
        ));

        let storage = Arc::clone(&options.storage);
        let user = normalize_user(user, &options);
        let user_key = UserCacheKey::from_user(&user, sdk_key, options.custom_cache_key.as_ref());
        let store = Store::new(
            Arc::clone(&storage),
            user_key.clone(),
            options.on_device_specs.clone(),
        );

        let fallback = options
            .fallback_enabled
            .then(|| FallbackResolver::new(sdk_key, Arc::clone(&storage), DNS_QUERY_ENDPOINT, DEFAULT_API_URL));
        let sync = Arc::new(SyncClient::new(
            http,
            SyncClientConfig {
                sdk_key: sdk_key.to_owned(),
                api_url: options.api_url.clone(),
                default_api_url: DEFAULT_API_URL.to_owned(),
                retry_backoff: options.retry_backoff,
                max_retries: options.max_retries,
            },
            fallback,
            diagnostics.clone(),
            Arc::clone(&error_boundary),
        ));

        let logger = Arc::new(EventLogger::new(
            EventLoggerConfig {
                max_queue_size: options.event_queue_max_size,
                flush_interval: options.event_flush_interval,
                disable_compression: options.disable_compression,
            },
            Arc::clone(&sync),
            storage,
            handle.clone(),
            user.clone(),
        ));
        logger.set_compression_supported(store.sdk_flags().enable_log_event_compression);
        logger.start();
        logger.resend_failed_requests();

        let hash = if options.disable_hashing {
            HashAlgorithm::None
        } else {
            HashAlgorithm::Djb2
        };

        let inner = Arc::new(ClientInner {
            sdk_key: sdk_key.to_owned(),
            options,
            runtime: handle,
            hash,
            user: RwLock::new(user.clone()),
            store,
            sync,
            logger,
            dedupe: ExposureDedupe::new(),
            error_boundary,
            diagnostics,
            in_flight: Mutex::new(HashMap::new()),
            next_fetch_id: AtomicU64::new(0),
            initialized: Completion::new(),
            listeners: RwLock::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        });

        match inner.options.initialize_values.clone() {
            Some(values) => {
                let result = inner.apply_bootstrap(&user, &user_key, values);
                inner.finish_initialization(result);
            }
            None => inner.spawn_fetch(user, user_key, |inner, result| {
                inner.finish_initialization(result)
            }),
        }

        let poller = if inner.options.enable_auto_value_update {
            let weak = Arc::downgrade(&inner);
            let config = PollerThreadConfig {
                interval: inner.options.auto_value_update_interval,
                jitter: inner.options.auto_value_update_jitter,
            };
            Some(PollerThread::start(config, move || match weak.upgrade() {
                Some(inner) => inner.refresh(),
                None => Err(Error::ShutDown),
            })?)
        } else {
            None
        };

        Ok(StatsigClient {
            inner,
            poller: Mutex::new(poller),
            runtime: Some(runtime),
        })
    }

    /// Block until the first fetch completes or the init timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if values didn't arrive in time. They are still applied when they do.
    /// - The error the fetch failed with, e.g. [`Error::Unauthorized`].
    pub fn wait_for_initialization(&self) -> Result<()> {
        self.inner
            .initialized
            .wait(self.inner.options.init_timeout)
    }

    /// Whether initialization finished, successfully or not.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.get().is_some()
    }

    /// Where the values currently used for evaluation came from.
    pub fn evaluation_source(&self) -> EvaluationSource {
        self.inner.store.source()
    }

    /// Register `listener`. If initialization already finished, `on_initialized` is called right
    /// away.
    pub fn add_listener(&self, listener: Arc<dyn StatsigListening>) {
        self.inner
            .listeners
            .write()
            .expect("thread holding listeners lock should not panic")
            .push(Arc::clone(&listener));
        if let Some(result) = self.inner.initialized.get() {
            listener.on_initialized(result.as_ref().err());
        }
    }

    pub fn check_gate(&self, name: &str) -> bool {
        self.inner.check_gate_internal(name, true).value
    }

    pub fn check_gate_with_exposure_logging_disabled(&self, name: &str) -> bool {
        self.inner.check_gate_internal(name, false).value
    }

    /// The gate together with its rule and evaluation details. Logs an exposure.
    pub fn get_feature_gate(&self, name: &str) -> FeatureGate {
        self.inner.check_gate_internal(name, true)
    }

    pub fn manually_log_gate_exposure(&self, name: &str) {
        let gate = self.inner.check_gate_internal(name, false);
        self.inner
            .log_gate_exposure(&self.inner.current_user(), &gate, true);
    }

    pub fn get_config(&self, name: &str) -> DynamicConfig {
        self.inner.get_config_internal(name, true)
    }

    pub fn get_config_with_exposure_logging_disabled(&self, name: &str) -> DynamicConfig {
        self.inner.get_config_internal(name, false)
    }

    pub fn manually_log_config_exposure(&self, name: &str) {
        let config = self.inner.get_config_internal(name, false);
        self.inner
            .log_config_exposure(&self.inner.current_user(), &config, true);
    }

    /// Experiment values for the current user.
    ///
    /// With `keep_device_value`, the first value the user received while enrolled in an active
    /// experiment is returned until the experiment is deactivated.
    pub fn get_experiment(&self, name: &str, keep_device_value: bool) -> DynamicConfig {
        self.inner
            .get_experiment_internal(name, keep_device_value, true)
    }

    pub fn get_experiment_with_exposure_logging_disabled(
        &self,
        name: &str,
        keep_device_value: bool,
    ) -> DynamicConfig {
        self.inner
            .get_experiment_internal(name, keep_device_value, false)
    }

    pub fn manually_log_experiment_exposure(&self, name: &str, keep_device_value: bool) {
        let experiment = self
            .inner
            .get_experiment_internal(name, keep_device_value, false);
        self.inner
            .log_config_exposure(&self.inner.current_user(), &experiment, true);
    }

    /// Layer values for the current user. Exposures are logged per parameter read.
    pub fn get_layer(&self, name: &str, keep_device_value: bool) -> Layer {
        self.inner.get_layer_internal(name, keep_device_value, true)
    }

    pub fn get_layer_with_exposure_logging_disabled(&self, name: &str, keep_device_value: bool) -> Layer {
        self.inner.get_layer_internal(name, keep_device_value, false)
    }

    pub fn manually_log_layer_parameter_exposure(
        &self,
        name: &str,
        parameter: &str,
        keep_device_value: bool,
    ) {
        let layer = self.inner.get_layer_internal(name, keep_device_value, false);
        self.inner.log_layer_exposure(&layer, parameter, true);
    }

    pub fn get_parameter_store(&self, name: &str) -> ParameterStore {
        self.inner.get_parameter_store_internal(name, true)
    }

    pub fn get_parameter_store_with_exposure_logging_disabled(&self, name: &str) -> ParameterStore {
        self.inner.get_parameter_store_internal(name, false)
    }

    /// Log a custom event. Empty names are ignored; names are truncated to 64 characters.
    pub fn log_event(
        &self,
        name: &str,
        value: Option<Value>,
        metadata: Option<HashMap<String, String>>,
    ) {
        let user = self.inner.current_user();
        match Event::custom(&user, name, value, metadata) {
            Some(event) => self.inner.logger.log(event),
            None => log::warn!(target: "statsig", "event name must not be empty"),
        }
    }

    /// Switch to `user` and fetch their values, waiting up to the init timeout.
    ///
    /// Cached values for the user, if any, are used right away.
    pub fn update_user(&self, user: StatsigUser) -> Result<()> {
        self.inner.update_user(user)
    }

    pub fn get_user(&self) -> StatsigUser {
        self.inner.current_user()
    }

    pub fn get_stable_id(&self) -> Option<String> {
        self.inner.current_user().stable_id().map(str::to_owned)
    }

    pub fn override_gate(&self, name: &str, value: bool) {
        self.inner.store.override_gate(name, value);
    }

    pub fn override_config(&self, name: &str, value: Map<String, Value>) {
        self.inner.store.override_config(name, value);
    }

    pub fn override_layer(&self, name: &str, value: Map<String, Value>) {
        self.inner.store.override_layer(name, value);
    }

    pub fn remove_override(&self, name: &str) {
        self.inner.store.remove_override(name);
    }

    pub fn remove_all_overrides(&self) {
        self.inner.store.remove_all_overrides();
    }

    pub fn get_all_overrides(&self) -> StatsigOverrides {
        self.inner.store.all_overrides()
    }

    /// Send queued events in the background.
    pub fn flush(&self) {
        self.inner.logger.flush();
    }

    /// Stop background updates and send pending events, waiting at most
    /// [`StatsigOptions::shutdown_timeout`]. Evaluations keep working afterwards.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!(target: "statsig", "shutting down");

        let poller = self
            .poller
            .lock()
            .expect("thread holding poller lock should not panic")
            .take();
        if let Some(poller) = poller {
            if let Err(err) = poller.shutdown() {
                log::warn!(target: "statsig", "failed to stop value updates: {err}");
            }
        }

        self.inner.cancel_fetches();
        self.inner
            .logger
            .shutdown(self.inner.options.shutdown_timeout);
    }
}

impl Drop for StatsigClient {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            // Doesn't block, so dropping a client from async code is fine.
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write as _, sync::atomic::AtomicUsize};

    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::{hashing::djb2, storage::InMemoryStorage, EvaluationReason};

    const SDK_KEY: &str = "client-key";

    fn options(api_url: &str) -> StatsigOptions {
        let _ = env_logger::builder().is_test(true).try_init();
        StatsigOptions::new()
            .with_api_url(api_url)
            .with_retry_backoff(Duration::from_millis(1))
            .with_max_retries(0)
            .with_shutdown_timeout(Duration::from_millis(500))
            .with_error_reporting_disabled(true)
    }

    fn offline_options() -> StatsigOptions {
        options("http://127.0.0.1:1")
    }

    fn values(gate_value: bool, rule_id: &str) -> InitializeResponse {
        serde_json::from_value(json!({
            "has_updates": true,
            "time": 100,
            "hash_used": "djb2",
            "feature_gates": {
                djb2("a_gate"): {"name": djb2("a_gate"), "value": gate_value, "rule_id": rule_id}
            },
            "dynamic_configs": {
                djb2("a_config"): {"name": djb2("a_config"), "value": {"color": "red"}, "rule_id": "c1"}
            },
            "layer_configs": {
                djb2("a_layer"): {
                    "name": djb2("a_layer"), "value": {"size": 3, "shape": "round"}, "rule_id": "l1",
                    "allocated_experiment_name": djb2("exp"), "explicit_parameters": ["size"]
                }
            },
            "param_stores": {
                djb2("a_store"): {
                    "flag": {"param_type": "boolean", "ref_type": "gate", "gate_name": "a_gate",
                             "pass_value": true, "fail_value": false},
                    "color": {"param_type": "string", "ref_type": "dynamic_config",
                              "config_name": "a_config", "param_name": "color"}
                }
            }
        }))
        .unwrap()
    }

    /// Initialize response body that is only sent after `delay`, without blocking other requests.
    fn delayed_body(
        delay: Duration,
        body: String,
    ) -> impl Fn(&mut dyn std::io::Write) -> std::io::Result<()> + Send + Sync + 'static {
        move |writer| {
            std::thread::sleep(delay);
            writer.write_all(body.as_bytes())
        }
    }

    fn bootstrapped(user: StatsigUser) -> StatsigClient {
        StatsigClient::new(
            SDK_KEY,
            user,
            offline_options().with_initialize_values(values(true, "r1")),
        )
        .unwrap()
    }

    #[test]
    fn rejects_secret_keys() {
        let result = StatsigClient::new("secret-key", StatsigUser::new(), offline_options());
        assert!(matches!(result, Err(Error::InvalidSdkKey)));
    }

    #[test]
    fn fetches_and_confirms_values() {
        let mut server = mockito::Server::new();
        let initial = server
            .mock("POST", "/v1/initialize")
            .match_body(Matcher::PartialJson(json!({"sinceTime": 0})))
            .with_status(200)
            .with_body(serde_json::to_string(&values(true, "r1")).unwrap())
            .expect(1)
            .create();
        let not_modified = server
            .mock("POST", "/v1/initialize")
            .match_body(Matcher::PartialJson(json!({"sinceTime": 100})))
            .with_status(200)
            .with_body(json!({"has_updates": false}).to_string())
            .expect(1)
            .create();

        let user = StatsigUser::with_user_id("a");
        let client = StatsigClient::new(SDK_KEY, user.clone(), options(&server.url())).unwrap();
        client.wait_for_initialization().unwrap();

        let gate = client.get_feature_gate("a_gate");
        assert!(gate.value);
        assert_eq!(gate.rule_id, "r1");
        assert_eq!(gate.evaluation_details.source, EvaluationSource::Network);
        assert_eq!(gate.evaluation_details.lcut, Some(100));

        client.update_user(user).unwrap();
        let gate = client.get_feature_gate("a_gate");
        assert!(gate.value);
        assert_eq!(gate.evaluation_details.source, EvaluationSource::NetworkNotModified);

        initial.assert();
        not_modified.assert();
    }

    #[test]
    fn failed_fetch_reports_no_values() {
        let client = StatsigClient::new(SDK_KEY, StatsigUser::with_user_id("a"), offline_options()).unwrap();
        assert!(matches!(client.wait_for_initialization(), Err(Error::Network(_))));
        assert!(client.is_initialized());

        let gate = client.get_feature_gate("a_gate");
        assert!(!gate.value);
        assert_eq!(gate.evaluation_details.source, EvaluationSource::NoValues);
        assert_eq!(
            client.inner.logger.queued()[0].event_name,
            "statsig::fetch_values_failed"
        );
    }

    #[test]
    fn bootstrap_values_are_used_synchronously() {
        let client = bootstrapped(StatsigUser::with_user_id("a"));
        assert!(client.is_initialized());
        assert_eq!(client.evaluation_source(), EvaluationSource::Bootstrap);

        let config = client.get_config("a_config");
        assert_eq!(config.get_value("color", String::new()), "red");
        assert_eq!(config.evaluation_details.detailed_reason(), "Bootstrap:Recognized");
    }

    #[test]
    fn bootstrap_for_another_user_is_flagged() {
        let mut values = values(true, "r1");
        values.evaluated_keys = json!({"userID": "b"}).as_object().cloned();
        let client = StatsigClient::new(
            SDK_KEY,
            StatsigUser::with_user_id("a"),
            offline_options().with_initialize_values(values),
        )
        .unwrap();
        assert!(client.check_gate("a_gate"));
        assert_eq!(client.evaluation_source(), EvaluationSource::InvalidBootstrap);
    }

    #[test]
    fn bootstrap_for_another_key_is_rejected() {
        let mut values = values(true, "r1");
        values.hashed_sdk_key_used = Some(djb2("other-key"));
        let client = StatsigClient::new(
            SDK_KEY,
            StatsigUser::with_user_id("a"),
            offline_options().with_initialize_values(values),
        )
        .unwrap();
        assert!(matches!(client.wait_for_initialization(), Err(Error::SdkKeyMismatch)));
        assert!(!client.check_gate("a_gate"));
    }

    #[test]
    fn exposures_are_deduplicated() {
        let client = bootstrapped(StatsigUser::with_user_id("a"));
        client.check_gate("a_gate");
        client.check_gate("a_gate");
        client.check_gate_with_exposure_logging_disabled("a_gate");
        assert_eq!(client.inner.logger.queued().len(), 1);

        client.manually_log_gate_exposure("a_gate");
        assert_eq!(client.inner.logger.queued().len(), 1);

        client.manually_log_config_exposure("a_config");
        let queued = client.inner.logger.queued();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1].event_name, "statsig::config_exposure");
        assert_eq!(
            queued[1].metadata.as_ref().unwrap()["isManualExposure"],
            "true"
        );
    }

    #[test]
    fn layer_exposures_are_logged_per_parameter() {
        let client = bootstrapped(StatsigUser::with_user_id("a"));
        let layer = client.get_layer("a_layer", false);
        assert!(client.inner.logger.queued().is_empty());

        assert_eq!(layer.get_value("size", 0i64), 3);
        assert_eq!(layer.get_value("shape", String::new()), "round");
        assert_eq!(layer.get_value("missing", 7i64), 7);

        let queued = client.inner.logger.queued();
        assert_eq!(queued.len(), 2);
        assert_eq!(
            queued[0].metadata.as_ref().unwrap()["isExplicitParameter"],
            "true"
        );

        let quiet = client.get_layer_with_exposure_logging_disabled("a_layer", false);
        quiet.get_value("size", 0i64);
        assert_eq!(client.inner.logger.queued().len(), 2);
    }

    #[test]
    fn parameter_store_resolves_references() {
        let client = bootstrapped(StatsigUser::with_user_id("a"));
        let store = client.get_parameter_store("a_store");
        assert!(store.get_value("flag", false));
        assert_eq!(store.get_value("color", String::new()), "red");
        assert_eq!(store.get_value("missing", 1i64), 1);
    }

    #[test]
    fn overrides_win_over_values() {
        let client = bootstrapped(StatsigUser::with_user_id("a"));
        client.override_gate("a_gate", false);
        let gate = client.get_feature_gate("a_gate");
        assert!(!gate.value);
        assert_eq!(gate.evaluation_details.reason, Some(EvaluationReason::LocalOverride));

        client.override_config("a_config", json!({"color": "blue"}).as_object().cloned().unwrap());
        assert_eq!(client.get_config("a_config").get_value("color", String::new()), "blue");
        assert_eq!(client.get_all_overrides().gates.len(), 1);

        client.remove_all_overrides();
        assert!(client.check_gate("a_gate"));
    }

    #[test]
    fn custom_events_are_queued() {
        let client = bootstrapped(StatsigUser::with_user_id("a"));
        client.log_event("", None, None);
        client.log_event("purchase", Some(json!(9.99)), Some(HashMap::from([("item".to_owned(), "hat".to_owned())])));
        let queued = client.inner.logger.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].event_name, "purchase");
        assert_eq!(queued[0].user["userID"], "a");
    }

    #[test]
    fn stable_id_is_persisted() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(InMemoryStorage::new());
        let first = StatsigClient::new(
            SDK_KEY,
            StatsigUser::new(),
            offline_options().with_storage(Arc::clone(&storage)),
        )
        .unwrap();
        let stable_id = first.get_stable_id().unwrap();
        drop(first);

        let second = StatsigClient::new(
            SDK_KEY,
            StatsigUser::new(),
            offline_options().with_storage(Arc::clone(&storage)),
        )
        .unwrap();
        assert_eq!(second.get_stable_id(), Some(stable_id));

        let overridden = StatsigClient::new(
            SDK_KEY,
            StatsigUser::new(),
            offline_options().with_storage(storage).with_stable_id("custom"),
        )
        .unwrap();
        assert_eq!(overridden.get_stable_id().as_deref(), Some("custom"));
    }

    #[test]
    fn listeners_are_notified() {
        struct Counter(AtomicUsize);
        impl StatsigListening for Counter {
            fn on_initialized(&self, error: Option<&Error>) {
                assert!(error.is_none());
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let client = bootstrapped(StatsigUser::with_user_id("a"));
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        client.add_listener(counter.clone());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn environment_is_attached_to_user() {
        let client = StatsigClient::new(
            SDK_KEY,
            StatsigUser::with_user_id("a"),
            offline_options()
                .with_environment("staging")
                .with_initialize_values(values(true, "r1")),
        )
        .unwrap();
        assert_eq!(
            client.get_user().statsig_environment.get("tier").map(String::as_str),
            Some("staging")
        );
    }

    #[test]
    fn shutdown_flushes_events() {
        let mut server = mockito::Server::new();
        let _initialize = server
            .mock("POST", "/v1/initialize")
            .with_status(200)
            .with_body(serde_json::to_string(&values(true, "r1")).unwrap())
            .create();
        let rgstr = server
            .mock("POST", "/v1/rgstr")
            .match_body(Matcher::Regex("statsig::gate_exposure".to_owned()))
            .with_status(202)
            .expect(1)
            .create();

        let client = StatsigClient::new(
            SDK_KEY,
            StatsigUser::with_user_id("a"),
            options(&server.url()).with_compression_disabled(true),
        )
        .unwrap();
        client.wait_for_initialization().unwrap();
        client.check_gate("a_gate");
        client.shutdown();
        rgstr.assert();

        assert!(matches!(client.update_user(StatsigUser::new()), Err(Error::ShutDown)));
    }

    #[test]
    fn superseded_fetch_never_applies_its_values() {
        let mut server = mockito::Server::new();
        let initial = server
            .mock("POST", "/v1/initialize")
            .with_status(200)
            .with_chunked_body(delayed_body(
                Duration::from_millis(500),
                serde_json::to_string(&values(false, "stale")).unwrap(),
            ))
            .expect(1)
            .create();
        let updated = server
            .mock("POST", "/v1/initialize")
            .match_body(Matcher::PartialJson(json!({"user": {"email": "a@x.y"}})))
            .with_status(200)
            .with_body(serde_json::to_string(&values(true, "fresh")).unwrap())
            .expect(1)
            .create();

        let client = StatsigClient::new(SDK_KEY, StatsigUser::with_user_id("a"), options(&server.url())).unwrap();
        for _ in 0..100 {
            if initial.matched() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        // same cache key, so this replaces the initial fetch
        client
            .update_user(StatsigUser::with_user_id("a").with_email("a@x.y"))
            .unwrap();
        assert_eq!(client.get_feature_gate("a_gate").rule_id, "fresh");

        std::thread::sleep(Duration::from_millis(700));
        let gate = client.get_feature_gate("a_gate");
        assert!(gate.value);
        assert_eq!(gate.rule_id, "fresh");
        // the initial fetch's waiters were handed to its replacement
        assert!(client.is_initialized());
        client.wait_for_initialization().unwrap();

        initial.assert();
        updated.assert();
    }

    #[test]
    fn values_arriving_after_init_timeout_are_applied() {
        let mut server = mockito::Server::new();
        let _initialize = server
            .mock("POST", "/v1/initialize")
            .with_status(200)
            .with_chunked_body(delayed_body(
                Duration::from_millis(600),
                serde_json::to_string(&values(true, "r1")).unwrap(),
            ))
            .create();

        let client = StatsigClient::new(
            SDK_KEY,
            StatsigUser::with_user_id("a"),
            options(&server.url()).with_init_timeout(Duration::from_millis(200)),
        )
        .unwrap();
        assert!(matches!(client.wait_for_initialization(), Err(Error::Timeout)));
        assert!(!client.is_initialized());
        assert!(!client.check_gate("a_gate"));
        assert_eq!(client.evaluation_source(), EvaluationSource::Loading);

        std::thread::sleep(Duration::from_secs(1));
        let gate = client.get_feature_gate("a_gate");
        assert!(gate.value);
        assert_eq!(gate.evaluation_details.source, EvaluationSource::Network);
        client.wait_for_initialization().unwrap();
    }

    #[test]
    fn auto_update_during_initial_fetch_still_initializes() {
        let mut server = mockito::Server::new();
        let _initialize = server
            .mock("POST", "/v1/initialize")
            .with_status(503)
            .create();

        // The first poll fires while the initial fetch is still backing off, replacing it.
        let client = StatsigClient::new(
            SDK_KEY,
            StatsigUser::with_user_id("a"),
            options(&server.url())
                .with_retry_backoff(Duration::from_millis(300))
                .with_max_retries(1)
                .with_init_timeout(Duration::from_secs(2))
                .with_auto_value_update(true)
                .with_auto_value_update_interval(Duration::from_millis(50))
                .with_auto_value_update_jitter(Duration::ZERO),
        )
        .unwrap();
        assert!(matches!(client.wait_for_initialization(), Err(Error::HttpStatus(503))));
        assert!(client.is_initialized());
        assert_eq!(client.evaluation_source(), EvaluationSource::NoValues);
    }

    #[test]
    fn stalled_requests_time_out() {
        let mut server = mockito::Server::new();
        let _initialize = server
            .mock("POST", "/v1/initialize")
            .with_status(200)
            .with_chunked_body(delayed_body(
                Duration::from_secs(1),
                serde_json::to_string(&values(true, "r1")).unwrap(),
            ))
            .create();

        let client = StatsigClient::new(
            SDK_KEY,
            StatsigUser::with_user_id("a"),
            options(&server.url())
                .with_request_timeout(Duration::from_millis(100))
                .with_init_timeout(Duration::from_millis(800)),
        )
        .unwrap();
        match client.wait_for_initialization() {
            Err(Error::Network(err)) => assert!(err.is_timeout()),
            other => panic!("expected a request timeout, got {other:?}"),
        }
        assert_eq!(client.evaluation_source(), EvaluationSource::NoValues);
    }

    #[test]
    fn shutdown_releases_pending_fetches() {
        let mut server = mockito::Server::new();
        let _initialize = server
            .mock("POST", "/v1/initialize")
            .with_status(200)
            .with_chunked_body(delayed_body(
                Duration::from_millis(500),
                serde_json::to_string(&values(true, "r1")).unwrap(),
            ))
            .create();

        let client = StatsigClient::new(SDK_KEY, StatsigUser::with_user_id("a"), options(&server.url())).unwrap();
        client.shutdown();
        assert!(matches!(client.wait_for_initialization(), Err(Error::ShutDown)));
    }
}

//! Batching and delivery of analytics events.
//!
//! Events are appended to an in-memory queue. The queue is drained atomically (swap-and-clear)
//! when it reaches its maximum size, on a timer, and on shutdown, so producers never wait on
//! network I/O. Batches that fail to send are persisted, bounded by total size, and resent the next
//! time a logger starts.
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{interval_at, Instant},
};

use crate::{network::sync_client::SyncClient, storage::KeyValueStorage, Error, StatsigUser};

use super::event::Event;

pub(crate) const FAILED_REQUESTS_STORAGE_KEY: &str =
    "com.Statsig.EventLogger.loggingRequestUserDefaultsKey";
/// Upper bound on the total size of persisted failed requests.
pub(crate) const MAX_SAVED_REQUEST_BYTES: usize = 1_000_000;
pub(crate) const LOG_EVENT_FAILED: &str = "log_event_failed";

#[derive(Debug, Clone)]
pub(crate) struct EventLoggerConfig {
    pub max_queue_size: usize,
    pub flush_interval: Duration,
    pub disable_compression: bool,
}

pub(crate) struct EventLogger {
    config: EventLoggerConfig,
    sync: Arc<SyncClient>,
    storage: Arc<dyn KeyValueStorage>,
    runtime: Handle,
    user: RwLock<StatsigUser>,
    queue: Mutex<Vec<Event>>,
    failed_requests: Mutex<VecDeque<Vec<u8>>>,
    logged_errors: Mutex<HashSet<String>>,
    /// Set from the server's sdk flags.
    compression_supported: AtomicBool,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventLogger {
    pub(crate) fn new(
        config: EventLoggerConfig,
        sync: Arc<SyncClient>,
        storage: Arc<dyn KeyValueStorage>,
        runtime: Handle,
        user: StatsigUser,
    ) -> EventLogger {
        EventLogger {
            config,
            sync,
            storage,
            runtime,
            user: RwLock::new(user),
            queue: Mutex::new(Vec::new()),
            failed_requests: Mutex::new(VecDeque::new()),
            logged_errors: Mutex::new(HashSet::new()),
            compression_supported: AtomicBool::new(false),
            flush_task: Mutex::new(None),
        }
    }

    /// Start the periodic flush. The timer stops once the logger is dropped or shut down.
    pub(crate) fn start(self: &Arc<Self>) {
        let logger = Arc::downgrade(self);
        let period = self.config.flush_interval;
        let task = self.runtime.spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(logger) = logger.upgrade() else {
                    return;
                };
                logger.flush();
            }
        });
        if let Some(previous) = self.lock_flush_task().replace(task) {
            previous.abort();
        }
    }

    pub(crate) fn set_user(&self, user: StatsigUser) {
        *self
            .user
            .write()
            .expect("thread holding event logger user lock should not panic") = user;
    }

    pub(crate) fn set_compression_supported(&self, supported: bool) {
        self.compression_supported.store(supported, Ordering::Relaxed);
    }

    pub(crate) fn log(self: &Arc<Self>, event: Event) {
        let should_flush = {
            let mut queue = self.lock_queue();
            queue.push(event);
            queue.len() >= self.config.max_queue_size
        };
        if should_flush {
            self.flush();
        }
    }

    /// Send everything queued so far in the background.
    pub(crate) fn flush(self: &Arc<Self>) {
        let _ = self.flush_in_background();
    }

    pub(crate) fn flush_in_background(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let body = self.take_request()?;
        let logger = Arc::clone(self);
        Some(self.runtime.spawn(async move { logger.send(body).await }))
    }

    /// Stop the flush timer and send pending events, waiting at most `timeout`.
    pub(crate) fn shutdown(self: &Arc<Self>, timeout: Duration) {
        if let Some(task) = self.lock_flush_task().take() {
            task.abort();
        }
        let Some(body) = self.take_request() else {
            return;
        };

        let (sender, receiver) = std::sync::mpsc::sync_channel::<()>(1);
        let logger = Arc::clone(self);
        self.runtime.spawn(async move {
            logger.send(body).await;
            let _ = sender.send(());
        });
        if receiver.recv_timeout(timeout).is_err() {
            log::warn!(target: "statsig", "timed out flushing events on shutdown");
        }
    }

    /// Resend requests persisted by a previous run. Requests that fail again are persisted again.
    pub(crate) fn resend_failed_requests(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let saved = self.storage.get_array(FAILED_REQUESTS_STORAGE_KEY)?;
        self.storage.remove(FAILED_REQUESTS_STORAGE_KEY);
        let requests: Vec<Vec<u8>> = saved
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|encoded| BASE64.decode(encoded).ok())
            .collect();
        if requests.is_empty() {
            return None;
        }

        log::debug!(target: "statsig", count = requests.len(); "resending failed event requests");
        let logger = Arc::clone(self);
        Some(self.runtime.spawn(async move {
            let mut failed = Vec::new();
            for body in requests {
                if let Err(err) = logger.sync.send_events(body.clone(), false).await {
                    log::debug!(target: "statsig", "failed to resend event request: {err}");
                    failed.push(body);
                }
            }
            if !failed.is_empty() {
                logger.store_failed_requests(failed);
            }
        }))
    }

    fn take_request(&self) -> Option<Vec<u8>> {
        let events = std::mem::take(&mut *self.lock_queue());
        if events.is_empty() {
            return None;
        }
        let count = events.len();

        let user = self
            .user
            .read()
            .expect("thread holding event logger user lock should not panic");
        let body = json!({
            "events": events,
            "user": user.to_json(true),
            "statsigMetadata": user.statsig_metadata(),
        });
        match serde_json::to_vec(&body) {
            Ok(body) => {
                log::debug!(target: "statsig", count; "flushing events");
                Some(body)
            }
            Err(err) => {
                log::warn!(target: "statsig", "failed to serialize events: {err}");
                None
            }
        }
    }

    async fn send(self: Arc<Self>, body: Vec<u8>) {
        let compress = !self.config.disable_compression
            && self.compression_supported.load(Ordering::Relaxed);
        if let Err(err) = self.sync.send_events(body.clone(), compress).await {
            self.store_failed_requests(vec![body]);
            self.report_failure(&err);
        }
    }

    /// Log one `statsig::log_event_failed` event per distinct error message.
    fn report_failure(self: &Arc<Self>, err: &Error) {
        let message = err.to_string();
        let first_seen = self
            .logged_errors
            .lock()
            .expect("thread holding logged errors lock should not panic")
            .insert(message.clone());
        if first_seen {
            let user = self
                .user
                .read()
                .expect("thread holding event logger user lock should not panic")
                .clone();
            let metadata = HashMap::from([("error".to_owned(), message)]);
            self.log(Event::internal(&user, LOG_EVENT_FAILED, metadata));
        }
    }

    /// Append `requests`, evict the oldest past the size bound, and persist the rest.
    fn store_failed_requests(&self, requests: Vec<Vec<u8>>) {
        let mut failed = self
            .failed_requests
            .lock()
            .expect("thread holding failed requests lock should not panic");
        failed.extend(requests);

        let mut total: usize = failed.iter().map(Vec::len).sum();
        while total > MAX_SAVED_REQUEST_BYTES {
            match failed.pop_front() {
                Some(evicted) => total -= evicted.len(),
                None => break,
            }
        }

        let encoded = failed
            .iter()
            .map(|body| Value::String(BASE64.encode(body)))
            .collect();
        self.storage.set_array(FAILED_REQUESTS_STORAGE_KEY, encoded);
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.queue
            .lock()
            .expect("thread holding event queue lock should not panic")
    }

    fn lock_flush_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.flush_task
            .lock()
            .expect("thread holding flush task lock should not panic")
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> Vec<Event> {
        self.lock_queue().clone()
    }
}

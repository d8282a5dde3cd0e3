//! Last-resort handling of internal failures.
//!
//! Failures are reported once per `tag:kind` pair to the SDK exception endpoint, and the
//! surrounding operation falls back to its default value.
use std::{
    collections::HashSet,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Mutex,
};

use serde_json::json;
use tokio::runtime::Handle;

use crate::{Error, Result};

pub const DEFAULT_EXCEPTION_URL: &str = "https://statsigapi.net/v1/sdk_exception";

pub(crate) struct ErrorBoundary {
    sdk_key: String,
    url: String,
    http: reqwest::Client,
    /// Reports are sent from this runtime. Without it errors are only logged.
    runtime: Option<Handle>,
    seen: Mutex<HashSet<String>>,
}

impl ErrorBoundary {
    pub(crate) fn new(
        sdk_key: &str,
        url: impl Into<String>,
        http: reqwest::Client,
        runtime: Option<Handle>,
    ) -> ErrorBoundary {
        ErrorBoundary {
            sdk_key: sdk_key.to_owned(),
            url: url.into(),
            http,
            runtime,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Run `task`. If it fails or panics, report the failure and return `recovery()` instead.
    pub(crate) fn capture<T>(
        &self,
        tag: &'static str,
        task: impl FnOnce() -> Result<T>,
        recovery: impl FnOnce() -> T,
    ) -> T {
        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                self.log_exception(tag, &err);
                recovery()
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                self.log_exception(tag, &Error::Unexpected(message));
                recovery()
            }
        }
    }

    /// Report `err` unless the same kind of error was already reported for `tag`.
    pub(crate) fn log_exception(&self, tag: &str, err: &Error) {
        log::warn!(target: "statsig", tag, kind = err.kind(); "an unexpected error occurred: {err}");
        if !self.mark_seen(tag, err) {
            return;
        }

        let Some(runtime) = &self.runtime else {
            return;
        };
        let request = self
            .http
            .post(&self.url)
            .header("STATSIG-API-KEY", &self.sdk_key)
            .json(&json!({
                "exception": err.kind(),
                "info": err.to_string(),
                "tag": tag,
                "statsigMetadata": crate::statsig_metadata(),
            }));
        runtime.spawn(async move {
            if let Err(err) = request.send().await {
                log::debug!(target: "statsig", "failed to report sdk exception: {err}");
            }
        });
    }

    /// Returns `true` the first time a `tag:kind` pair is seen.
    fn mark_seen(&self, tag: &str, err: &Error) -> bool {
        let key = format!("{tag}:{}", err.kind());
        self.seen
            .lock()
            .expect("thread holding error boundary lock should not panic")
            .insert(key)
    }
}

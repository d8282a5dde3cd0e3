//! Timing markers reported to an injected recorder. The SDK never serializes or uploads them
//! itself.
use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerAction {
    Start,
    End,
}

/// One start or end marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    /// `"overall"` for the whole initialization, or the endpoint name for network requests.
    pub key: String,
    pub action: MarkerAction,
    /// `Some("network_request")` for network markers.
    pub step: Option<&'static str>,
    pub attempt: Option<u32>,
    pub success: Option<bool>,
    pub status_code: Option<u16>,
    /// Milliseconds since the client was created.
    pub timestamp_ms: f64,
}

/// Receives diagnostics markers. Implementations must be cheap and non-blocking.
pub trait DiagnosticsRecorder: Send + Sync {
    fn record(&self, marker: Marker);
}

/// Recorder that keeps markers in memory.
#[derive(Debug, Default)]
pub struct InMemoryDiagnostics {
    markers: Mutex<Vec<Marker>>,
}

impl InMemoryDiagnostics {
    pub fn new() -> InMemoryDiagnostics {
        InMemoryDiagnostics::default()
    }

    /// Remove and return all markers recorded so far.
    pub fn take(&self) -> Vec<Marker> {
        std::mem::take(&mut *self.markers.lock().expect("thread holding markers lock should not panic"))
    }
}

impl DiagnosticsRecorder for InMemoryDiagnostics {
    fn record(&self, marker: Marker) {
        self.markers
            .lock()
            .expect("thread holding markers lock should not panic")
            .push(marker);
    }
}

pub(crate) const NETWORK_REQUEST_STEP: &str = "network_request";

/// Stamps markers relative to a fixed origin and forwards them to the recorder, if any.
#[derive(Clone)]
pub(crate) struct Diagnostics {
    recorder: Option<Arc<dyn DiagnosticsRecorder>>,
    origin: Instant,
}

impl Diagnostics {
    pub(crate) fn new(recorder: Option<Arc<dyn DiagnosticsRecorder>>) -> Diagnostics {
        Diagnostics {
            recorder,
            origin: Instant::now(),
        }
    }

    fn mark(&self, key: &str, action: MarkerAction, step: Option<&'static str>, attempt: Option<u32>, success: Option<bool>, status_code: Option<u16>) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        recorder.record(Marker {
            key: key.to_owned(),
            action,
            step,
            attempt,
            success,
            status_code,
            timestamp_ms: self.origin.elapsed().as_secs_f64() * 1000.0,
        });
    }

    pub(crate) fn overall_start(&self) {
        self.mark("overall", MarkerAction::Start, None, None, None, None);
    }

    pub(crate) fn overall_end(&self, success: bool) {
        self.mark("overall", MarkerAction::End, None, None, Some(success), None);
    }

    pub(crate) fn network_start(&self, key: &str, attempt: u32) {
        self.mark(key, MarkerAction::Start, Some(NETWORK_REQUEST_STEP), Some(attempt), None, None);
    }

    pub(crate) fn network_end(&self, key: &str, attempt: u32, success: bool, status_code: Option<u16>) {
        self.mark(
            key,
            MarkerAction::End,
            Some(NETWORK_REQUEST_STEP),
            Some(attempt),
            Some(success),
            status_code,
        );
    }
}

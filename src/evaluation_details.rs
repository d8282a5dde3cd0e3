use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Where the values backing an evaluation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EvaluationSource {
    /// The client hasn't been initialized.
    #[default]
    Uninitialized,
    /// Initialization is in flight and nothing is cached for the user.
    Loading,
    /// Initialization finished but no values exist for the user.
    NoValues,
    /// Values came from a network response.
    Network,
    /// The network confirmed the cached values are current.
    NetworkNotModified,
    /// Values were loaded from local storage.
    Cache,
    /// Values were supplied through `initialize_values` or on-device specs.
    Bootstrap,
    /// Bootstrap values were generated for a different user.
    InvalidBootstrap,
}

/// Why a particular value was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationReason {
    Recognized,
    Unrecognized,
    Sticky,
    LocalOverride,
    /// The spec uses a condition or operator this SDK can't evaluate.
    Unsupported,
}

impl EvaluationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationSource::Uninitialized => "Uninitialized",
            EvaluationSource::Loading => "Loading",
            EvaluationSource::NoValues => "NoValues",
            EvaluationSource::Network => "Network",
            EvaluationSource::NetworkNotModified => "NetworkNotModified",
            EvaluationSource::Cache => "Cache",
            EvaluationSource::Bootstrap => "Bootstrap",
            EvaluationSource::InvalidBootstrap => "InvalidBootstrap",
        }
    }
}

impl EvaluationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::Recognized => "Recognized",
            EvaluationReason::Unrecognized => "Unrecognized",
            EvaluationReason::Sticky => "Sticky",
            EvaluationReason::LocalOverride => "LocalOverride",
            EvaluationReason::Unsupported => "Unsupported",
        }
    }
}

/// Details about how a gate, config, layer or parameter store value was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetails {
    pub source: EvaluationSource,
    #[serde(default)]
    pub reason: Option<EvaluationReason>,
    /// Last config update time of the values used.
    #[serde(default)]
    pub lcut: Option<u64>,
    /// When the values were received, in milliseconds since epoch.
    #[serde(default)]
    pub received_at: Option<u64>,
}

impl EvaluationDetails {
    pub fn new(
        source: EvaluationSource,
        reason: EvaluationReason,
        lcut: Option<u64>,
        received_at: Option<u64>,
    ) -> Self {
        EvaluationDetails {
            source,
            reason: Some(reason),
            lcut,
            received_at,
        }
    }

    pub fn uninitialized() -> Self {
        EvaluationDetails::default()
    }

    /// `Source:Reason`, or just the source when nothing was available to evaluate against.
    pub fn detailed_reason(&self) -> String {
        let source = self.source.as_str();
        if matches!(
            self.source,
            EvaluationSource::NoValues | EvaluationSource::Uninitialized
        ) {
            return source.to_owned();
        }
        match self.reason {
            Some(reason) => format!("{source}:{}", reason.as_str()),
            None => source.to_owned(),
        }
    }

    pub(crate) fn add_to_metadata(&self, metadata: &mut HashMap<String, String>) {
        metadata.insert("reason".to_owned(), self.detailed_reason());
        if let Some(lcut) = self.lcut {
            metadata.insert("lcut".to_owned(), lcut.to_string());
        }
        if let Some(received_at) = self.received_at {
            metadata.insert("receivedAt".to_owned(), received_at.to_string());
        }
    }
}

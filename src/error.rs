use std::sync::Arc;

/// Represents a result type for operations in the Statsig SDK.
///
/// The error variant is the SDK-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Statsig SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The SDK key is empty or is a server secret key.
    #[error("invalid sdk key: must be a non-empty client key, not a server secret")]
    InvalidSdkKey,

    /// Invalid API URL configuration.
    #[error("invalid api url configuration")]
    InvalidUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid SDK key.
    #[error("unauthorized, sdk key is likely invalid")]
    Unauthorized,

    /// Server responded with a non-success status code.
    #[error("request failed with status code {0}")]
    HttpStatus(u16),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Malformed JSON either received from the server or read from local storage.
    #[error(transparent)]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    Json(Arc<serde_json::Error>),

    /// An I/O error.
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    /// DNS-over-HTTPS lookup for fallback domains failed.
    #[error("dns query failed: {0}")]
    DnsQueryFailed(&'static str),

    /// Response was produced for a different SDK key.
    #[error("response was generated for a different sdk key")]
    SdkKeyMismatch,

    /// Initialization did not complete within the configured timeout.
    #[error("timed out waiting for values")]
    Timeout,

    /// A background thread or task panicked. This should normally never happen.
    #[error("background thread panicked")]
    ThreadPanicked,

    /// The client has been shut down.
    #[error("client is shut down")]
    ShutDown,

    /// Catch-all for internal invariants that didn't hold.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Stable name of the error kind. Used to deduplicate error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidSdkKey => "InvalidSdkKey",
            Error::InvalidUrl(_) => "InvalidUrl",
            Error::Unauthorized => "Unauthorized",
            Error::HttpStatus(_) => "HttpStatus",
            Error::Network(_) => "Network",
            Error::Json(_) => "Json",
            Error::Io(_) => "Io",
            Error::DnsQueryFailed(_) => "DnsQueryFailed",
            Error::SdkKeyMismatch => "SdkKeyMismatch",
            Error::Timeout => "Timeout",
            Error::ThreadPanicked => "ThreadPanicked",
            Error::ShutDown => "ShutDown",
            Error::Unexpected(_) => "Unexpected",
        }
    }

    /// Configuration errors are never retried.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidSdkKey | Error::InvalidUrl(_) | Error::Unauthorized
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(Arc::new(value))
    }
}

impl From<url::ParseError> for Error {
    fn from(value: url::ParseError) -> Self {
        Error::InvalidUrl(value)
    }
}

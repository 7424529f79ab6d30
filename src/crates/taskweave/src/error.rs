//! Error types for taskweave workloads

use taskweave_core::{AggregateError, CancelReason, Canceled, CoreError};
use thiserror::Error;

/// Result type alias for workload operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Failure of a single fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Timeouts, refused connections, resets
    #[error("request to {url} failed: {message}")]
    Transient { url: String, message: String },

    /// The server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The body exceeded the configured size limit
    #[error("response from {url} exceeds {limit} bytes (got at least {size})")]
    TooLarge { url: String, size: usize, limit: usize },

    /// The request could not be built or the response not read
    #[error("invalid request to {url}: {message}")]
    Invalid { url: String, message: String },

    /// The cancellation signal fired
    #[error("request {0}")]
    Canceled(CancelReason),
}

impl FetchError {
    /// Whether retrying the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::TooLarge { .. } | Self::Invalid { .. } | Self::Canceled(_) => false,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Transient { url, .. }
            | Self::Status { url, .. }
            | Self::TooLarge { url, .. }
            | Self::Invalid { url, .. } => Some(url),
            Self::Canceled(_) => None,
        }
    }

    pub(crate) fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            };
        }

        if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
            Self::Transient {
                url: url.to_string(),
                message: error.to_string(),
            }
        } else {
            Self::Invalid {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

impl From<Canceled> for FetchError {
    fn from(canceled: Canceled) -> Self {
        Self::Canceled(canceled.reason)
    }
}

/// Error raised by a workload
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A fetch failed outside of any retry or aggregate
    #[error("fetch failed")]
    Fetch(#[source] FetchError),

    /// Every retry attempt failed; `source` is the last attempt's error
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: FetchError,
    },

    /// The first fault observed by an aggregate wait
    #[error("aggregate wait failed")]
    AggregateFailure(#[source] FetchError),

    /// One or more file writes failed
    #[error("{0}")]
    WriteFailures(AggregateError<std::io::Error>),

    /// The workload was canceled
    #[error("tasks {0}")]
    Canceled(CancelReason),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Classify a fetch error, keeping cancellation distinct from failure
    pub fn from_fetch(error: FetchError) -> Self {
        match error {
            FetchError::Canceled(reason) => Self::Canceled(reason),
            other => Self::Fetch(other),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Config(message) => Self::Config(message),
            other => Self::Config(other.to_string()),
        }
    }
}

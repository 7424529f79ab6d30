//! Error handling utilities
//!
//! - [`TaskError`] is how a consumer sees a task that did not complete
//!   successfully: either it faulted with the operation's own error, or it
//!   was canceled. The two are kept apart so callers can treat "timed out"
//!   differently from "failed".
//! - Error chain formatting and root cause extraction for reporting.

mod chain;

pub use chain::{error_chain_length, format_error_chain, root_cause};

use std::error::Error as StdError;
use std::fmt;

/// Non-success terminal outcome of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
    /// The operation failed with its own error
    Faulted(E),
    /// The operation was canceled before producing a result
    Canceled,
}

impl<E> TaskError<E> {
    /// Returns `true` for [`TaskError::Canceled`]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Borrow the operation's error, if it faulted
    pub fn fault(&self) -> Option<&E> {
        match self {
            Self::Faulted(error) => Some(error),
            Self::Canceled => None,
        }
    }

    /// Take the operation's error, if it faulted
    pub fn into_fault(self) -> Option<E> {
        match self {
            Self::Faulted(error) => Some(error),
            Self::Canceled => None,
        }
    }
}

// Faults display as the operation's own error; nothing is wrapped.
impl<E: fmt::Display> fmt::Display for TaskError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Faulted(error) => write!(f, "{}", error),
            Self::Canceled => write!(f, "task was canceled"),
        }
    }
}

impl<E: StdError + 'static> StdError for TaskError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Faulted(error) => error.source(),
            Self::Canceled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display_is_verbatim() {
        let err: TaskError<String> = TaskError::Faulted("connection reset".to_string());
        assert_eq!(err.to_string(), "connection reset");
        assert!(!err.is_canceled());
        assert_eq!(err.fault().map(String::as_str), Some("connection reset"));
    }

    #[test]
    fn test_canceled() {
        let err: TaskError<String> = TaskError::Canceled;
        assert!(err.is_canceled());
        assert_eq!(err.to_string(), "task was canceled");
        assert!(err.into_fault().is_none());
    }

    #[test]
    fn test_source_is_transparent() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = TaskError::Faulted(inner);
        assert!(err.source().is_none());
        assert_eq!(error_chain_length(&err), 1);
    }
}

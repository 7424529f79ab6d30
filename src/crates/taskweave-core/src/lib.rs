//! Task orchestration primitives for taskweave
//!
//! This crate provides the small set of coordination building blocks the rest
//! of the workspace is built on. Every combinator consumes [`TaskHandle`]s and
//! produces new ones, so they compose freely.
//!
//! # Modules
//!
//! - `task` - Task handles, completers and terminal outcomes
//! - `cancel` - Cooperative cancellation signals with optional deadlines
//! - `retry` - Retry-with-backoff execution and retry policies
//! - `interleave` - Completion-order multiplexing of concurrent operations
//! - `aggregate` - "When all or first failure" aggregate waits
//! - `race` - Single-shot "first to finish" waits
//! - `clock` - Clock/timer collaborator
//! - `config` - Configuration helpers with environment variable loading
//! - `error` - Task error types and error chain formatting
//! - `logging` - Structured logging helpers and formatters
//!
//! # Example
//!
//! ```rust,ignore
//! use taskweave_core::{interleave, wait_all_or_first_failure, TaskHandle};
//!
//! let handles: Vec<TaskHandle<usize, String>> = urls
//!     .iter()
//!     .map(|url| TaskHandle::spawn(fetch_len(url.clone())))
//!     .collect();
//!
//! let mut total = 0;
//! for slot in interleave(handles) {
//!     total += slot.result().await?;
//! }
//! ```

pub mod aggregate;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod interleave;
pub mod logging;
pub mod race;
pub mod retry;
pub mod task;

pub use aggregate::{wait_all, wait_all_or_first_failure, AggregateError, AggregateOutcome};
pub use cancel::{CancelReason, Canceled, CancellationSignal, ListenerId};
pub use clock::{Clock, TokioClock};
pub use error::TaskError;
pub use interleave::{interleave, InterleavedCompletionStream};
pub use race::{next_completed, when_any};
pub use retry::{execute_with_retry, with_retry, RetryError, RetryExecutor, RetryPolicy};
pub use task::{Completer, TaskHandle, TaskId, TaskOutcome, TaskState};

use thiserror::Error;

/// Errors raised by the ambient parts of the crate (configuration, environment)
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Environment variable present but unusable
    #[error("Environment variable {key}: {message}")]
    Env { key: String, message: String },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

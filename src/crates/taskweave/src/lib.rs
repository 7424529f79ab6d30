//! taskweave - concurrent fetch and write workloads
//!
//! This crate wires the combinators from `taskweave-core` to concrete
//! collaborators:
//!
//! - `fetch` - The [`Fetcher`] trait and its reqwest implementation
//! - `workloads` - The [`Orchestrator`] and its reference workloads
//! - `config` - Layered configuration (defaults, file, environment)
//! - `error` - Fetch and workload error types
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskweave::{CancellationSignal, FetchConfig, HttpFetcher, Orchestrator};
//!
//! let fetcher = Arc::new(HttpFetcher::new(FetchConfig::new())?);
//! let orchestrator = Orchestrator::new(fetcher);
//! let report = orchestrator
//!     .sum_interleaved(&urls, &CancellationSignal::new())
//!     .await?;
//! println!("{} bytes", report.total_bytes);
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod workloads;

pub use config::{OrchestratorConfig, DEFAULT_URLS};
pub use error::{FetchError, OrchestratorError, Result};
pub use fetch::{FetchConfig, Fetcher, HttpFetcher};
pub use workloads::{Orchestrator, PageSize, Strategy, WorkloadReport};

pub use taskweave_core::{CancelReason, CancellationSignal};

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Version string with the core crate's version
pub fn version_info() -> String {
    format!(
        "taskweave {} (taskweave-core {})",
        version(),
        taskweave_core::version()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let info = version_info();
        assert!(info.starts_with("taskweave "));
        assert!(info.contains("taskweave-core"));
    }
}

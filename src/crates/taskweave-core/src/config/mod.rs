//! Configuration management utilities
//!
//! - `ConfigBuilder` trait: defaults, environment overrides and validation
//! - Environment variable loading with proper error handling
//!
//! # Example
//!
//! ```rust,ignore
//! use taskweave_core::config::ConfigBuilder;
//! use taskweave_core::RetryPolicy;
//!
//! // TASKWEAVE_RETRY_MAX_ATTEMPTS=5 overrides the default of 3
//! let policy = RetryPolicy::from_env("TASKWEAVE_RETRY_")?;
//! ```

mod builder;
mod env;

pub use builder::ConfigBuilder;
pub use env::{build_env_key, get_env, get_env_bool, get_env_parse};

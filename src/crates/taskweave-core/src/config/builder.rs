//! Configuration builder trait
//!
//! Configuration values are layered: defaults first, then whatever the
//! caller merged in (files, flags), then environment variables, and the
//! result is validated once at the end.

use crate::Result;

/// Trait for configuration structures loaded from defaults and environment
///
/// # Example
///
/// ```rust,ignore
/// use taskweave_core::config::{build_env_key, get_env_parse, ConfigBuilder};
///
/// #[derive(Clone, Default)]
/// struct PoolConfig {
///     workers: usize,
/// }
///
/// impl ConfigBuilder for PoolConfig {
///     fn validate(&self) -> taskweave_core::Result<()> {
///         if self.workers == 0 {
///             return Err(taskweave_core::CoreError::Config("workers must be non-zero".into()));
///         }
///         Ok(())
///     }
///
///     fn apply_env(&mut self, prefix: &str) -> taskweave_core::Result<()> {
///         if let Some(workers) = get_env_parse(&build_env_key(prefix, "workers"))? {
///             self.workers = workers;
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait ConfigBuilder: Default + Clone {
    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Override fields from `{PREFIX}{FIELD_NAME}` environment variables
    ///
    /// Variables that are not set leave the current value untouched.
    fn apply_env(&mut self, prefix: &str) -> Result<()>;

    /// Defaults, validated
    fn build() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the environment, validated
    fn from_env(prefix: &str) -> Result<Self> {
        Self::default().with_env(prefix)
    }

    /// This configuration overridden by the environment, validated
    fn with_env(mut self, prefix: &str) -> Result<Self> {
        self.apply_env(prefix)?;
        self.validate()?;
        Ok(self)
    }
}

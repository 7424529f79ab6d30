//! Retry utilities for async operations
//!
//! Two layers are provided:
//!
//! - [`execute_with_retry`] is the bare loop: an operation factory, an
//!   attempt budget and a caller-supplied backoff future. The last error is
//!   returned unmodified once the budget is spent.
//! - [`RetryExecutor`] wraps a [`RetryPolicy`] (exponential backoff with
//!   optional jitter) and adds a retry predicate, a retry hook and
//!   cooperative cancellation.

use crate::cancel::{CancelReason, CancellationSignal};
use crate::config::{build_env_key, get_env_bool, get_env_parse, ConfigBuilder};
use crate::CoreError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retrying failed operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts
    ///
    /// ```rust
    /// use taskweave_core::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(3);
    /// assert_eq!(policy.max_attempts, 3);
    /// ```
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    /// Policy with a fixed delay between attempts and no jitter
    pub fn fixed(max_attempts: usize, interval: Duration) -> Self {
        Self::new(max_attempts)
            .with_initial_interval(interval.as_secs_f64())
            .with_backoff_factor(1.0)
            .with_max_interval(interval.as_secs_f64())
            .with_jitter(false)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attempt budget, never less than one
    pub fn effective_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Calculate the delay before retrying after failed attempt `attempt` (0-indexed)
    ///
    /// `initial_interval * backoff_factor ^ attempt`, capped at `max_interval`,
    /// scaled by a random factor in `[0.5, 1.5]` when jitter is enabled.
    /// Attempts beyond the budget get no delay.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::ZERO;
        }

        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_interval);

        let final_delay = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        if final_delay.is_nan() || final_delay <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(final_delay).unwrap_or(Duration::MAX)
    }

    /// Check if more attempts are allowed after `attempt` attempts were made
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ConfigBuilder for RetryPolicy {
    fn validate(&self) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::Config("max_attempts must be at least 1".into()));
        }
        let out_of_range = |value: f64| !value.is_finite() || value < 0.0;
        if out_of_range(self.initial_interval) || out_of_range(self.max_interval) {
            return Err(CoreError::Config(
                "retry intervals must be finite and non-negative".into(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(CoreError::Config(
                "backoff_factor must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> crate::Result<()> {
        if let Some(value) = get_env_parse(&build_env_key(prefix, "max_attempts"))? {
            self.max_attempts = value;
        }
        if let Some(value) = get_env_parse(&build_env_key(prefix, "initial_interval"))? {
            self.initial_interval = value;
        }
        if let Some(value) = get_env_parse(&build_env_key(prefix, "backoff_factor"))? {
            self.backoff_factor = value;
        }
        if let Some(value) = get_env_parse(&build_env_key(prefix, "max_interval"))? {
            self.max_interval = value;
        }
        if let Some(value) = get_env_bool(&build_env_key(prefix, "jitter"))? {
            self.jitter = value;
        }
        Ok(())
    }
}

/// Run `operation` until it succeeds or `max_attempts` attempts failed
///
/// The factory is called once per attempt for a fresh future. After a
/// failed attempt `k` (0-indexed) that is not the last one, `backoff(k)` is
/// awaited before the next attempt. When the budget is spent the last error
/// is returned unmodified. A budget of zero is treated as one.
///
/// ```rust,ignore
/// let body = execute_with_retry(
///     || client.get(url),
///     3,
///     |_| tokio::time::sleep(Duration::from_millis(100)),
/// )
/// .await?;
/// ```
pub async fn execute_with_retry<F, Fut, T, E, B, BFut>(
    mut operation: F,
    max_attempts: usize,
    mut backoff: B,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: FnMut(usize) -> BFut,
    BFut: Future<Output = ()>,
{
    let max_attempts = if max_attempts == 0 {
        warn!("max_attempts of 0 clamped to 1");
        1
    } else {
        max_attempts
    };

    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if attempt >= max_attempts {
                    debug!(attempts = attempt, "retry budget exhausted");
                    return Err(error);
                }
                debug!(attempt, max_attempts, "attempt failed, backing off");
                backoff(attempt - 1).await;
            }
        }
    }
}

/// Execute an async operation with a [`RetryPolicy`]
///
/// ```rust,ignore
/// let policy = RetryPolicy::new(3);
/// let result = with_retry(&policy, || call_api()).await?;
/// ```
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    execute_with_retry(operation, policy.max_attempts, |attempt| {
        let delay = policy.calculate_delay(attempt);
        tokio::time::sleep(delay)
    })
    .await
}

/// Why a [`RetryExecutor`] gave up
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed; `last` is the final attempt's error
    Exhausted { attempts: usize, last: E },
    /// The retry predicate rejected an error
    Aborted { attempts: usize, error: E },
    /// The cancellation signal fired
    Canceled(CancelReason),
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::Exhausted { attempts, .. } | Self::Aborted { attempts, .. } => Some(*attempts),
            Self::Canceled(_) => None,
        }
    }

    /// The operation error that ended the loop, if any
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Aborted { error, .. } => Some(error),
            Self::Canceled(_) => None,
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Aborted { error, .. } => Some(error),
            Self::Canceled(_) => None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

impl<E> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, .. } => {
                write!(f, "retries exhausted after {} attempts", attempts)
            }
            Self::Aborted { attempts, .. } => {
                write!(f, "non-retryable error on attempt {}", attempts)
            }
            Self::Canceled(reason) => write!(f, "retry loop {}", reason),
        }
    }
}

impl<E: StdError + 'static> StdError for RetryError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Aborted { error, .. } => Some(error),
            Self::Canceled(_) => None,
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(usize, &E, Duration) + Send + Sync>;

/// Policy-driven retry loop
///
/// ```rust,ignore
/// let executor = RetryExecutor::new(RetryPolicy::new(4))
///     .retry_if(|e: &FetchError| e.is_transient())
///     .on_retry(|attempt, error, delay| warn!(attempt, %error, ?delay, "retrying"))
///     .with_signal(signal.clone());
///
/// let body = executor.run(|| fetcher.fetch(url, &signal)).await?;
/// ```
pub struct RetryExecutor<E> {
    policy: RetryPolicy,
    retry_if: Option<RetryPredicate<E>>,
    on_retry: Option<RetryHook<E>>,
    signal: Option<CancellationSignal>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            retry_if: self.retry_if.clone(),
            on_retry: self.on_retry.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("retry_if", &self.retry_if.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("signal", &self.signal)
            .finish()
    }
}

impl<E> RetryExecutor<E> {
    pub fn new(policy: RetryPolicy) -> Self {
        if policy.max_attempts == 0 {
            warn!("max_attempts of 0 clamped to 1");
        }
        Self {
            policy,
            retry_if: None,
            on_retry: None,
            signal: None,
        }
    }

    /// Only retry errors for which `predicate` returns `true`
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Hook called with `(attempt, error, delay)` before each backoff
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(usize, &E, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Stop retrying once `signal` fires
    pub fn with_signal(mut self, signal: CancellationSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` under this executor's policy
    ///
    /// The signal is checked before every attempt and raced against each
    /// backoff delay. An attempt already in flight is not interrupted.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.effective_attempts();
        let mut attempt = 0;

        loop {
            self.check_signal()?;

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            attempt += 1;

            if let Some(predicate) = &self.retry_if {
                if !predicate(&error) {
                    debug!(attempt, "error rejected by retry predicate");
                    return Err(RetryError::Aborted {
                        attempts: attempt,
                        error,
                    });
                }
            }

            if attempt >= max_attempts {
                debug!(attempts = attempt, "retry budget exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.calculate_delay(attempt - 1);
            if let Some(hook) = &self.on_retry {
                hook(attempt, &error, delay);
            }
            debug!(attempt, max_attempts, ?delay, "attempt failed, backing off");

            match &self.signal {
                Some(signal) => {
                    tokio::select! {
                        biased;
                        _ = signal.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    fn check_signal(&self) -> Result<(), RetryError<E>> {
        match self.signal.as_ref().and_then(CancellationSignal::reason) {
            Some(reason) => Err(RetryError::Canceled(reason)),
            None => Ok(()),
        }
    }
}

/// Check if an error message indicates a transient failure worth retrying
///
/// Recognizes timeouts, connection failures, rate limiting and 5xx statuses.
///
/// ```rust
/// use taskweave_core::retry::is_transient_message;
///
/// assert!(is_transient_message("Connection timeout"));
/// assert!(is_transient_message("503 Service Unavailable"));
/// assert!(!is_transient_message("404 Not Found"));
/// ```
pub fn is_transient_message(error_msg: &str) -> bool {
    let lower = error_msg.to_lowercase();

    lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("unavailable")
        || ["500", "502", "503", "504"]
            .iter()
            .any(|code| lower.contains(code))
}

//! Clock collaborator
//!
//! Workloads read time and sleep through [`Clock`] so tests can substitute
//! the tokio test clock or a fake.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Source of the current time and of delays
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn delay(&self, duration: Duration);

    /// Time elapsed since `earlier`
    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// [`Clock`] backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn delay(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

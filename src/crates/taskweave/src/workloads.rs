//! Reference workloads
//!
//! The [`Orchestrator`] composes the core combinators with a [`Fetcher`]:
//! every summing workload launches one fetch per URL up front and differs
//! only in how it consumes the handles.
//!
//! | Workload | Consumption |
//! |----------|-------------|
//! | `sum_sequential` | await in input order |
//! | `sum_drain_by_completion` | repeated `when_any` over the pending set |
//! | `sum_interleaved` | an `InterleavedCompletionStream` |
//! | `sum_all_or_first_failure` | `wait_all_or_first_failure` |

use crate::error::{FetchError, OrchestratorError, Result};
use crate::fetch::Fetcher;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use taskweave_core::logging::{format_bytes, format_thousands};
use taskweave_core::{
    next_completed, wait_all, wait_all_or_first_failure, CancelReason, CancellationSignal, Clock,
    InterleavedCompletionStream, RetryError, RetryExecutor, RetryPolicy, TaskHandle, TaskOutcome,
    TokioClock,
};
use tracing::{debug, info, warn};

/// One fetched page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSize {
    pub url: String,
    pub bytes: usize,
}

/// Summary of one workload run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadReport {
    pub workload: String,
    pub total_bytes: usize,
    pub completed: usize,
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    /// Pages in the order they were folded into the total
    pub pages: Vec<PageSize>,
}

/// How a summing workload consumes its fetch handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sequential,
    DrainByCompletion,
    Interleaved,
    AllOrFirstFailure,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sequential => "sequential",
            Self::DrainByCompletion => "drain_by_completion",
            Self::Interleaved => "interleaved",
            Self::AllOrFirstFailure => "all_or_first_failure",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct Tally {
    total_bytes: usize,
    pages: Vec<PageSize>,
}

impl Tally {
    fn add(&mut self, page: PageSize) {
        info!(url = %page.url, bytes = page.bytes, "Completed");
        self.total_bytes += page.bytes;
        self.pages.push(page);
    }

    /// Fold one outcome; faults and cancellation end the workload
    fn fold(
        &mut self,
        outcome: TaskOutcome<PageSize, FetchError>,
        signal: &CancellationSignal,
    ) -> Result<()> {
        match outcome {
            TaskOutcome::Completed(page) => {
                self.add(page);
                Ok(())
            }
            TaskOutcome::Faulted(error) => Err(OrchestratorError::from_fetch(error)),
            TaskOutcome::Canceled => Err(canceled(signal)),
        }
    }
}

fn canceled(signal: &CancellationSignal) -> OrchestratorError {
    OrchestratorError::Canceled(signal.reason().unwrap_or(CancelReason::Manual))
}

/// Runs the reference workloads against a [`Fetcher`]
pub struct Orchestrator<F: ?Sized> {
    fetcher: Arc<F>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<F> Orchestrator<F>
where
    F: Fetcher + ?Sized + 'static,
{
    pub fn new(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            clock: Arc::new(TokioClock),
            retry: RetryPolicy::default(),
        }
    }

    /// Measure elapsed time with `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Policy used by [`Orchestrator::fetch_size_with_retry`]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Launch one fetch per URL, each abandoned once `signal` fires
    fn spawn_fetches(
        &self,
        urls: &[String],
        signal: &CancellationSignal,
    ) -> Vec<TaskHandle<PageSize, FetchError>> {
        urls.iter()
            .map(|url| {
                let fetcher = Arc::clone(&self.fetcher);
                let task_signal = signal.clone();
                let url = url.clone();
                TaskHandle::spawn_cancellable(signal, async move {
                    let body = fetcher.fetch(&url, &task_signal).await?;
                    Ok::<_, FetchError>(PageSize {
                        bytes: body.len(),
                        url,
                    })
                })
            })
            .collect()
    }

    /// Sum page sizes, consuming the fetches with `strategy`
    pub async fn sum(
        &self,
        workload: &str,
        urls: &[String],
        signal: &CancellationSignal,
        strategy: Strategy,
    ) -> Result<WorkloadReport> {
        let started_at = Utc::now();
        let start = self.clock.now();
        debug!(workload, %strategy, urls = urls.len(), "Starting workload");

        let handles = self.spawn_fetches(urls, signal);
        let mut tally = Tally::default();

        match strategy {
            Strategy::Sequential => {
                for handle in handles {
                    tally.fold(handle.await, signal)?;
                }
            }
            Strategy::DrainByCompletion => {
                let mut pending = handles;
                while let Some(done) = next_completed(&mut pending).await {
                    tally.fold(done.await, signal)?;
                }
            }
            Strategy::Interleaved => {
                let mut stream = InterleavedCompletionStream::new(handles);
                while let Some(outcome) = stream.next().await {
                    tally.fold(outcome, signal)?;
                }
            }
            Strategy::AllOrFirstFailure => match wait_all_or_first_failure(handles).await {
                TaskOutcome::Completed(pages) => pages.into_iter().for_each(|page| tally.add(page)),
                TaskOutcome::Faulted(FetchError::Canceled(reason)) => {
                    return Err(OrchestratorError::Canceled(reason))
                }
                TaskOutcome::Faulted(error) => {
                    return Err(OrchestratorError::AggregateFailure(error))
                }
                TaskOutcome::Canceled => return Err(canceled(signal)),
            },
        }

        Ok(self.report(workload, tally, started_at, start))
    }

    fn report(
        &self,
        workload: &str,
        tally: Tally,
        started_at: DateTime<Utc>,
        start: tokio::time::Instant,
    ) -> WorkloadReport {
        let elapsed = self.clock.since(start);
        info!(
            workload,
            total_bytes = %format_thousands(tally.total_bytes),
            size = %format_bytes(tally.total_bytes),
            completed = tally.pages.len(),
            ?elapsed,
            "Workload finished"
        );

        WorkloadReport {
            workload: workload.to_string(),
            total_bytes: tally.total_bytes,
            completed: tally.pages.len(),
            elapsed,
            started_at,
            pages: tally.pages,
        }
    }

    /// Launch all fetches, then await them in input order
    pub async fn sum_sequential(
        &self,
        urls: &[String],
        signal: &CancellationSignal,
    ) -> Result<WorkloadReport> {
        self.sum("sum_sequential", urls, signal, Strategy::Sequential)
            .await
    }

    /// Fold each fetch as soon as it finishes
    pub async fn sum_drain_by_completion(
        &self,
        urls: &[String],
        signal: &CancellationSignal,
    ) -> Result<WorkloadReport> {
        self.sum("sum_drain_by_completion", urls, signal, Strategy::DrainByCompletion)
            .await
    }

    /// Fold fetches through an interleaved completion stream
    pub async fn sum_interleaved(
        &self,
        urls: &[String],
        signal: &CancellationSignal,
    ) -> Result<WorkloadReport> {
        self.sum("sum_interleaved", urls, signal, Strategy::Interleaved)
            .await
    }

    /// Sum once every fetch succeeded; stop at the first failure
    pub async fn sum_all_or_first_failure(
        &self,
        urls: &[String],
        signal: &CancellationSignal,
    ) -> Result<WorkloadReport> {
        self.sum("sum_all_or_first_failure", urls, signal, Strategy::AllOrFirstFailure)
            .await
    }

    /// Sequential sum under a deadline
    pub async fn sum_with_timeout(
        &self,
        urls: &[String],
        timeout: Duration,
    ) -> Result<WorkloadReport> {
        let signal = CancellationSignal::with_timeout(timeout);
        signal.register(move |reason| debug!(%reason, ?timeout, "Deadline reached"));
        self.sum("sum_with_timeout", urls, &signal, Strategy::Sequential)
            .await
    }

    /// Sequential sum that stops when `signal` is triggered
    pub async fn sum_until_signalled(
        &self,
        urls: &[String],
        signal: &CancellationSignal,
    ) -> Result<WorkloadReport> {
        self.sum("sum_until_signalled", urls, signal, Strategy::Sequential)
            .await
    }

    /// Fetch one page, retrying transient failures under the configured policy
    pub async fn fetch_size_with_retry(
        &self,
        url: &str,
        signal: &CancellationSignal,
    ) -> Result<WorkloadReport> {
        let started_at = Utc::now();
        let start = self.clock.now();

        let executor = RetryExecutor::new(self.retry.clone())
            .retry_if(FetchError::is_transient)
            .on_retry(|attempt, error: &FetchError, delay| {
                warn!(attempt, %error, ?delay, "Fetch failed, retrying");
            })
            .with_signal(signal.clone());

        let body = executor
            .run(|| self.fetcher.fetch(url, signal))
            .await
            .map_err(|error| match error {
                RetryError::Exhausted { attempts, last } => OrchestratorError::RetriesExhausted {
                    attempts,
                    source: last,
                },
                RetryError::Aborted { error, .. } => OrchestratorError::from_fetch(error),
                RetryError::Canceled(reason) => OrchestratorError::Canceled(reason),
            })?;

        let mut tally = Tally::default();
        tally.add(PageSize {
            url: url.to_string(),
            bytes: body.len(),
        });
        Ok(self.report("fetch_size_with_retry", tally, started_at, start))
    }

    /// Write `count` small files into `dir` concurrently
    ///
    /// Every write runs to completion; on failure the error lists each
    /// file that could not be written.
    pub async fn write_files(&self, dir: &Path, count: usize) -> Result<WorkloadReport> {
        let started_at = Utc::now();
        let start = self.clock.now();
        tokio::fs::create_dir_all(dir).await?;

        let handles: Vec<TaskHandle<PageSize, std::io::Error>> = (1..=count)
            .map(|index| {
                let path = dir.join(format!("file-{:02}.txt", index));
                TaskHandle::spawn(async move {
                    let text = format!("In file {}\n", index);
                    debug!(path = %path.display(), "Writing file to disk");
                    tokio::fs::write(&path, text.as_bytes()).await?;
                    Ok::<_, std::io::Error>(PageSize {
                        url: path.display().to_string(),
                        bytes: text.len(),
                    })
                })
            })
            .collect();

        let written = wait_all(handles)
            .await
            .map_err(OrchestratorError::WriteFailures)?;

        let mut tally = Tally::default();
        written.into_iter().for_each(|page| tally.add(page));
        info!(dir = %dir.display(), "All files written");
        Ok(self.report("write_files", tally, started_at, start))
    }
}

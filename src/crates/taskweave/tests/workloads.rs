//! Workload tests against a scripted fetcher on paused time

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use taskweave::{
    CancelReason, CancellationSignal, FetchError, Fetcher, Orchestrator, OrchestratorError,
    Strategy,
};
use taskweave_core::RetryPolicy;
use tokio::time::Instant;

type FetchResult = Result<Vec<u8>, FetchError>;

struct Script {
    delay: Duration,
    queued: VecDeque<FetchResult>,
    fallback: FetchResult,
}

#[derive(Default)]
struct FakeFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
    fn new() -> Self {
        Self::default()
    }

    /// Every fetch of `url` returns `bytes` bytes after `delay`
    fn page(self, url: &str, bytes: usize, delay: Duration) -> Self {
        self.script(url, delay, Vec::new(), Ok(vec![0; bytes]))
    }

    /// Every fetch of `url` fails with `error` after `delay`
    fn failing(self, url: &str, error: FetchError, delay: Duration) -> Self {
        self.script(url, delay, Vec::new(), Err(error))
    }

    fn script(
        self,
        url: &str,
        delay: Duration,
        queued: Vec<FetchResult>,
        fallback: FetchResult,
    ) -> Self {
        self.scripts.lock().insert(
            url.to_string(),
            Script {
                delay,
                queued: queued.into(),
                fallback,
            },
        );
        self
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, signal: &CancellationSignal) -> FetchResult {
        *self.calls.lock().entry(url.to_string()).or_default() += 1;

        let (delay, result) = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(url) {
                Some(script) => {
                    let result = script
                        .queued
                        .pop_front()
                        .unwrap_or_else(|| script.fallback.clone());
                    (script.delay, result)
                }
                None => (
                    Duration::ZERO,
                    Err(FetchError::Status {
                        url: url.to_string(),
                        status: 404,
                    }),
                ),
            }
        };

        tokio::select! {
            biased;
            _ = signal.cancelled() => Err(FetchError::Canceled(
                signal.reason().unwrap_or(CancelReason::Manual),
            )),
            _ = tokio::time::sleep(delay) => result,
        }
    }
}

fn urls(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn transient(url: &str) -> FetchError {
    FetchError::Transient {
        url: url.to_string(),
        message: "connection reset".to_string(),
    }
}

fn three_pages() -> FakeFetcher {
    FakeFetcher::new()
        .page("a", 300, Duration::from_millis(300))
        .page("b", 100, Duration::from_millis(100))
        .page("c", 200, Duration::from_millis(200))
}

fn page_order(report: &taskweave::WorkloadReport) -> Vec<&str> {
    report.pages.iter().map(|page| page.url.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_sequential_runs_fetches_concurrently() {
    let orchestrator = Orchestrator::new(Arc::new(three_pages()));

    let report = orchestrator
        .sum_sequential(&urls(&["a", "b", "c"]), &CancellationSignal::new())
        .await
        .unwrap();

    assert_eq!(report.total_bytes, 600);
    assert_eq!(report.completed, 3);
    assert_eq!(page_order(&report), vec!["a", "b", "c"]);
    assert!(report.elapsed >= Duration::from_millis(300));
    assert!(report.elapsed < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn test_drain_and_interleaved_fold_in_completion_order() {
    let orchestrator = Orchestrator::new(Arc::new(three_pages()));
    let list = urls(&["a", "b", "c"]);

    let drained = orchestrator
        .sum_drain_by_completion(&list, &CancellationSignal::new())
        .await
        .unwrap();
    let interleaved = orchestrator
        .sum_interleaved(&list, &CancellationSignal::new())
        .await
        .unwrap();

    assert_eq!(drained.total_bytes, 600);
    assert_eq!(interleaved.total_bytes, drained.total_bytes);
    assert_eq!(page_order(&drained), vec!["b", "c", "a"]);
    assert_eq!(page_order(&interleaved), vec!["b", "c", "a"]);
    assert_eq!(interleaved.workload, "sum_interleaved");
}

#[tokio::test(start_paused = true)]
async fn test_sum_dispatches_on_strategy() {
    let orchestrator = Orchestrator::new(Arc::new(three_pages()));

    let report = orchestrator
        .sum(
            "custom",
            &urls(&["a", "b", "c"]),
            &CancellationSignal::new(),
            Strategy::AllOrFirstFailure,
        )
        .await
        .unwrap();

    assert_eq!(report.workload, "custom");
    assert_eq!(report.total_bytes, 600);
    assert_eq!(page_order(&report), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_dyn_fetcher() {
    let fetcher: Arc<dyn Fetcher> = Arc::new(three_pages());
    let orchestrator = Orchestrator::new(fetcher);

    let report = orchestrator
        .sum_interleaved(&urls(&["c", "a"]), &CancellationSignal::new())
        .await
        .unwrap();
    assert_eq!(report.total_bytes, 500);
}

#[tokio::test(start_paused = true)]
async fn test_first_failure_short_circuits() {
    let fetcher = FakeFetcher::new()
        .page("slow", 10, Duration::from_secs(10))
        .failing(
            "broken",
            FetchError::Status {
                url: "broken".to_string(),
                status: 404,
            },
            Duration::from_millis(50),
        );
    let orchestrator = Orchestrator::new(Arc::new(fetcher));

    let start = Instant::now();
    let error = orchestrator
        .sum_all_or_first_failure(&urls(&["slow", "broken"]), &CancellationSignal::new())
        .await
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(1));
    match error {
        OrchestratorError::AggregateFailure(FetchError::Status { status, .. }) => {
            assert_eq!(status, 404)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sequential_surfaces_fault() {
    let fetcher = FakeFetcher::new()
        .page("a", 10, Duration::from_millis(10))
        .failing("b", transient("b"), Duration::from_millis(20));
    let orchestrator = Orchestrator::new(Arc::new(fetcher));

    let error = orchestrator
        .sum_sequential(&urls(&["a", "b"]), &CancellationSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(error, OrchestratorError::Fetch(FetchError::Transient { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_third_attempt() {
    let fetcher = Arc::new(FakeFetcher::new().script(
        "flaky",
        Duration::ZERO,
        vec![Err(transient("flaky")), Err(transient("flaky"))],
        Ok(vec![0; 42]),
    ));
    let orchestrator = Orchestrator::new(Arc::clone(&fetcher)).with_retry_policy(
        RetryPolicy::new(3)
            .with_initial_interval(0.1)
            .with_jitter(false),
    );

    let report = orchestrator
        .fetch_size_with_retry("flaky", &CancellationSignal::new())
        .await
        .unwrap();

    assert_eq!(report.total_bytes, 42);
    assert_eq!(fetcher.calls("flaky"), 3);
    // 0.1s + 0.2s of backoff
    assert!(report.elapsed >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion() {
    let fetcher = Arc::new(FakeFetcher::new().failing(
        "down",
        FetchError::Status {
            url: "down".to_string(),
            status: 503,
        },
        Duration::ZERO,
    ));
    let orchestrator = Orchestrator::new(Arc::clone(&fetcher))
        .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(10)));

    let error = orchestrator
        .fetch_size_with_retry("down", &CancellationSignal::new())
        .await
        .unwrap_err();

    match error {
        OrchestratorError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert_eq!(
                source,
                FetchError::Status {
                    url: "down".to_string(),
                    status: 503
                }
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(fetcher.calls("down"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_on_permanent_error() {
    let fetcher = Arc::new(FakeFetcher::new());
    let orchestrator = Orchestrator::new(Arc::clone(&fetcher));

    let error = orchestrator
        .fetch_size_with_retry("missing", &CancellationSignal::new())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        OrchestratorError::Fetch(FetchError::Status { status: 404, .. })
    ));
    assert_eq!(fetcher.calls("missing"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_interrupted_by_signal() {
    let fetcher = Arc::new(FakeFetcher::new().failing("down", transient("down"), Duration::ZERO));
    let orchestrator = Orchestrator::new(Arc::clone(&fetcher)).with_retry_policy(
        RetryPolicy::new(5)
            .with_initial_interval(10.0)
            .with_jitter(false),
    );
    let signal = CancellationSignal::with_timeout(Duration::from_secs(1));

    let start = Instant::now();
    let error = orchestrator
        .fetch_size_with_retry("down", &signal)
        .await
        .unwrap_err();

    assert!(matches!(error, OrchestratorError::Canceled(CancelReason::Deadline)));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(fetcher.calls("down"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_workload() {
    let fetcher = FakeFetcher::new()
        .page("a", 10, Duration::from_secs(5))
        .page("b", 10, Duration::from_secs(5));
    let orchestrator = Orchestrator::new(Arc::new(fetcher));

    let start = Instant::now();
    let error = orchestrator
        .sum_with_timeout(&urls(&["a", "b"]), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(error, OrchestratorError::Canceled(CancelReason::Deadline)));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_not_reached() {
    let orchestrator = Orchestrator::new(Arc::new(three_pages()));

    let report = orchestrator
        .sum_with_timeout(&urls(&["a", "b", "c"]), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(report.total_bytes, 600);
}

#[tokio::test(start_paused = true)]
async fn test_manual_signal_cancels_workload() {
    let fetcher = FakeFetcher::new()
        .page("fast", 10, Duration::from_millis(10))
        .page("slow", 10, Duration::from_secs(60));
    let orchestrator = Orchestrator::new(Arc::new(fetcher));
    let signal = CancellationSignal::new();

    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.trigger();
    });

    let error = orchestrator
        .sum_until_signalled(&urls(&["fast", "slow"]), &signal)
        .await
        .unwrap_err();
    assert!(matches!(error, OrchestratorError::Canceled(CancelReason::Manual)));
}

#[tokio::test(start_paused = true)]
async fn test_already_triggered_signal() {
    let orchestrator = Orchestrator::new(Arc::new(three_pages()));
    let signal = CancellationSignal::new();
    signal.trigger();

    let error = orchestrator
        .sum_interleaved(&urls(&["a", "b"]), &signal)
        .await
        .unwrap_err();
    assert!(error.is_canceled());
}

#[tokio::test]
async fn test_write_files() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(Arc::new(FakeFetcher::new()));

    let report = orchestrator.write_files(dir.path(), 10).await.unwrap();

    assert_eq!(report.completed, 10);
    for index in 1..=10 {
        let path = dir.path().join(format!("file-{:02}.txt", index));
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, format!("In file {}\n", index));
    }
    assert_eq!(report.total_bytes, 9 * "In file 1\n".len() + "In file 10\n".len());
}

#[tokio::test]
async fn test_write_files_reports_every_failure() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::create_dir(dir.path().join("file-02.txt")).await.unwrap();
    tokio::fs::create_dir(dir.path().join("file-04.txt")).await.unwrap();
    let orchestrator = Orchestrator::new(Arc::new(FakeFetcher::new()));

    let error = orchestrator.write_files(dir.path(), 5).await.unwrap_err();

    match error {
        OrchestratorError::WriteFailures(aggregate) => {
            assert_eq!(aggregate.total(), 5);
            let indices: Vec<usize> = aggregate.failures().iter().map(|(i, _)| *i).collect();
            assert_eq!(indices, vec![1, 3]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(dir.path().join("file-05.txt").exists());
}

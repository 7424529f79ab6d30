//! Fetch collaborator
//!
//! Workloads download pages through the [`Fetcher`] trait. [`HttpFetcher`]
//! is the reqwest-backed implementation; tests substitute their own.
//!
//! # Example
//!
//! ```rust,ignore
//! use taskweave::fetch::{FetchConfig, Fetcher, HttpFetcher};
//!
//! let fetcher = HttpFetcher::new(
//!     FetchConfig::new()
//!         .with_timeout(Duration::from_secs(10))
//!         .with_pacing_delay(Duration::from_secs(1)),
//! )?;
//! let body = fetcher.fetch("https://docs.microsoft.com", &signal).await?;
//! ```

use crate::error::{FetchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use taskweave_core::{CancelReason, CancellationSignal, Clock, TokioClock};
use tracing::debug;

/// Downloads the body of a URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, giving up with [`FetchError::Canceled`] once `signal` fires
    async fn fetch(
        &self,
        url: &str,
        signal: &CancellationSignal,
    ) -> std::result::Result<Vec<u8>, FetchError>;
}

/// Configuration for [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-request timeout
    pub timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Responses larger than this are rejected
    pub max_response_bytes: usize,

    /// Delay before every request
    pub pacing_delay: Duration,

    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` from the environment
    pub use_system_proxy: bool,
}

impl FetchConfig {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("taskweave/{}", crate::version()),
            max_response_bytes: 1_000_000,
            pacing_delay: Duration::ZERO,
            use_system_proxy: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }

    pub fn with_system_proxy(mut self, enabled: bool) -> Self {
        self.use_system_proxy = enabled;
        self
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Fetcher`] over a reqwest client
pub struct HttpFetcher {
    config: FetchConfig,
    client: Client,
    clock: Arc<dyn Clock>,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone());

        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder.build()?;

        Ok(Self {
            config,
            client,
            clock: Arc::new(TokioClock),
        })
    }

    /// Use `clock` for the pacing delay
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        self.clock.delay(self.config.pacing_delay).await;
        debug!(url, "Processing url");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let limit = self.config.max_response_bytes;
        if let Some(length) = response.content_length() {
            let length = usize::try_from(length).unwrap_or(usize::MAX);
            if length > limit {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    size: length,
                    limit,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
        {
            let size = body.len() + chunk.len();
            if size > limit {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    size,
                    limit,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, bytes = body.len(), "Completed url");
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        signal: &CancellationSignal,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        signal.check()?;

        tokio::select! {
            biased;
            _ = signal.cancelled() => {
                Err(FetchError::Canceled(signal.reason().unwrap_or(CancelReason::Manual)))
            }
            result = self.download(url) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{}/page", addr)
    }

    fn local_fetcher(limit: usize) -> HttpFetcher {
        HttpFetcher::new(
            FetchConfig::new()
                .with_timeout(Duration::from_secs(5))
                .with_max_response_bytes(limit)
                .with_system_proxy(false),
        )
        .unwrap()
    }

    #[test]
    fn test_fetch_config_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.max_response_bytes, 1_000_000);
        assert_eq!(config.pacing_delay, Duration::ZERO);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("taskweave/"));
    }

    #[tokio::test]
    async fn test_fetch_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let body = local_fetcher(1_000)
            .fetch(&url, &CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let error = local_fetcher(1_000)
            .fetch(&url, &CancellationSignal::new())
            .await
            .unwrap_err();

        assert_eq!(error, FetchError::Status { url, status: 503 });
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello world",
        )
        .await;
        let error = local_fetcher(4)
            .fetch(&url, &CancellationSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(error, FetchError::TooLarge { size: 11, limit: 4, .. }));
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let error = local_fetcher(1_000)
            .fetch("not a url", &CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::Invalid { .. }));
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_already_canceled() {
        let signal = CancellationSignal::new();
        signal.trigger();

        let error = local_fetcher(1_000)
            .fetch("http://127.0.0.1:9/", &signal)
            .await
            .unwrap_err();
        assert_eq!(error, FetchError::Canceled(CancelReason::Manual));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_delay_is_interruptible() {
        let fetcher = HttpFetcher::new(
            FetchConfig::new()
                .with_pacing_delay(Duration::from_secs(60))
                .with_system_proxy(false),
        )
        .unwrap();
        let signal = CancellationSignal::with_timeout(Duration::from_millis(100));

        let error = fetcher
            .fetch("http://127.0.0.1:9/", &signal)
            .await
            .unwrap_err();
        assert_eq!(error, FetchError::Canceled(CancelReason::Deadline));
    }
}

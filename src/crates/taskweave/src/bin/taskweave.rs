//! taskweave CLI
//!
//! Runs the reference workloads against live URLs.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use taskweave::{
    version_info, CancellationSignal, HttpFetcher, Orchestrator, OrchestratorConfig,
    OrchestratorError, WorkloadReport,
};
use taskweave_core::error::{format_error_chain, root_cause};
use taskweave_core::logging::{format_duration, format_thousands, timed};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskweave")]
#[command(
    about = "Concurrent fetch workloads built from retry, interleave and cancellation combinators",
    long_about = None
)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (.toml, .yaml or .yml)
    #[arg(short, long, global = true, env = "TASKWEAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Workload(Workload),

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum Workload {
    /// Start every fetch, then await them in input order
    Sequential,

    /// Fold each fetch as soon as any one finishes
    Drain,

    /// Fold fetches through an interleaved completion stream
    Interleaved,

    /// Wait for every fetch, stopping at the first failure
    WhenAll,

    /// Fetch one URL, retrying transient failures
    Retry {
        /// URL to fetch
        url: String,
    },

    /// Cancel the fetches after a timeout
    CancelAfter {
        /// Timeout in milliseconds (defaults to the configured value)
        #[arg(long)]
        millis: Option<u64>,
    },

    /// Cancel the fetches when ENTER is pressed
    CancelOnEnter,

    /// Write files concurrently and report every failure
    WriteFiles {
        /// Output directory (defaults to the configured value)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Number of files (defaults to the configured value)
        #[arg(long)]
        count: Option<usize>,
    },
}

impl Workload {
    fn name(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Drain => "drain",
            Self::Interleaved => "interleaved",
            Self::WhenAll => "when-all",
            Self::Retry { .. } => "retry",
            Self::CancelAfter { .. } => "cancel-after",
            Self::CancelOnEnter => "cancel-on-enter",
            Self::WriteFiles { .. } => "write-files",
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Trigger `signal` when a line arrives on stdin
///
/// Runs on a plain thread so a pending read never holds up runtime shutdown.
fn trigger_on_enter(signal: CancellationSignal) {
    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            println!("\nENTER key pressed: cancelling downloads.\n");
            signal.trigger();
        }
    });
}

fn print_report(report: &WorkloadReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            for page in &report.pages {
                println!("{:<60} {:>10}", page.url, format_thousands(page.bytes));
            }
            println!("\nTotal bytes returned:  {}", format_thousands(report.total_bytes));
            println!("Elapsed time:          {}\n", format_duration(report.elapsed));
        }
    }
    Ok(())
}

async fn run(
    workload: Workload,
    config: &OrchestratorConfig,
    orchestrator: &Orchestrator<HttpFetcher>,
) -> taskweave::Result<WorkloadReport> {
    let urls = &config.urls;

    match workload {
        Workload::Sequential => {
            orchestrator
                .sum_sequential(urls, &CancellationSignal::new())
                .await
        }
        Workload::Drain => {
            orchestrator
                .sum_drain_by_completion(urls, &CancellationSignal::new())
                .await
        }
        Workload::Interleaved => {
            orchestrator
                .sum_interleaved(urls, &CancellationSignal::new())
                .await
        }
        Workload::WhenAll => {
            orchestrator
                .sum_all_or_first_failure(urls, &CancellationSignal::new())
                .await
        }
        Workload::Retry { url } => {
            println!("Trying to process the url: {}", url);
            orchestrator
                .fetch_size_with_retry(&url, &CancellationSignal::new())
                .await
        }
        Workload::CancelAfter { millis } => {
            let timeout = millis
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.cancel_after());
            println!("Cancel async tasks after {}.", format_duration(timeout));
            orchestrator.sum_with_timeout(urls, timeout).await
        }
        Workload::CancelOnEnter => {
            let signal = CancellationSignal::new();
            println!("Press the ENTER key to cancel...\n");
            trigger_on_enter(signal.clone());
            orchestrator.sum_until_signalled(urls, &signal).await
        }
        Workload::WriteFiles { dir, count } => {
            let dir = dir.unwrap_or_else(|| config.output_dir.clone());
            let count = count.unwrap_or(config.write_count);
            println!("Awaiting all tasks...");
            orchestrator.write_files(&dir, count).await
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let workload = match cli.command {
        Commands::Workload(workload) => workload,
        Commands::Version => {
            println!("{}", version_info());
            return Ok(());
        }
    };

    let config = OrchestratorConfig::load(cli.config.as_deref())
        .await
        .context("failed to load configuration")?;
    debug!(?config, "Effective configuration");

    let fetcher =
        HttpFetcher::new(config.fetch_config()).context("failed to build HTTP client")?;
    let orchestrator =
        Orchestrator::new(Arc::new(fetcher)).with_retry_policy(config.retry.clone());

    let name = workload.name();
    let (result, elapsed) = timed(name, run(workload, &config, &orchestrator)).await;
    debug!(command = name, elapsed = %format_duration(elapsed), "Command finished");

    match result {
        Ok(report) => print_report(&report, cli.format),
        Err(OrchestratorError::Canceled(reason)) => {
            println!("\nTasks cancelled: {}.\n", reason);
            Ok(())
        }
        Err(failure) => {
            error!(command = name, root_cause = %root_cause(&failure), "Command failed");
            eprintln!("{}", format_error_chain(&failure));
            std::process::exit(1);
        }
    }
}

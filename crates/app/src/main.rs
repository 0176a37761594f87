use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use judicial_search_core::{
    CancelFlag, HttpFormDriver, JsonFileStore, RetryPolicy, RunSummary, SearchConfig,
    SearchController, SearchPlan,
};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "judicial-search", version)]
struct Cli {
    /// Name to look up; prompted for when omitted.
    #[arg(long, env = "JUDICIAL_SEARCH_NAME")]
    name: Option<String>,

    /// JSON file listing the filter dimensions, coarse to fine.
    #[arg(long, env = "JUDICIAL_SEARCH_PLAN")]
    plan: PathBuf,

    /// Results and progress file, resumed when present.
    #[arg(long, env = "JUDICIAL_SEARCH_STATE", default_value = "judicial_results.json")]
    state: PathBuf,

    /// Form gateway URL that receives one probe per filter combination.
    #[arg(long, env = "JUDICIAL_SEARCH_ENDPOINT")]
    endpoint: String,

    /// Query parameter that carries the searched name.
    #[arg(long, env = "JUDICIAL_SEARCH_NAME_PARAM", default_value = "name")]
    name_param: String,

    /// Restrict a dimension to one value, e.g. --pin department=ANTIOQUIA.
    #[arg(long = "pin", value_name = "DIMENSION=VALUE")]
    pins: Vec<String>,

    /// Seconds before a probe is abandoned and retried.
    #[arg(long, env = "JUDICIAL_SEARCH_PROBE_TIMEOUT_SECS", default_value = "30")]
    probe_timeout_secs: u64,

    /// Probe attempts per combination, first try included.
    #[arg(long, env = "JUDICIAL_SEARCH_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,

    /// First retry delay; doubles on every further attempt.
    #[arg(long, env = "JUDICIAL_SEARCH_BACKOFF_MS", default_value = "500")]
    backoff_ms: u64,

    /// Upper bound for the retry delay.
    #[arg(long, env = "JUDICIAL_SEARCH_MAX_BACKOFF_MS", default_value = "10000")]
    max_backoff_ms: u64,

    /// Pause between two combinations.
    #[arg(long, env = "JUDICIAL_SEARCH_PAUSE_MS", default_value = "0")]
    pause_ms: u64,

    /// Log file appended to on every run, alongside the console output.
    #[arg(long, env = "JUDICIAL_SEARCH_LOG_FILE", default_value = "judicial_search.log")]
    log_file: PathBuf,
}

impl Cli {
    fn search_config(&self) -> SearchConfig {
        SearchConfig {
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                ..RetryPolicy::default()
            },
            pause_between_probes: Duration::from_millis(self.pause_ms),
        }
    }
}

fn open_log_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}

async fn prompt_for_name() -> anyhow::Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Enter the name to search for: ").await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading name from stdin")?;
    Ok(line)
}

fn report(summary: &RunSummary) {
    println!(
        "status={:?} completed={}/{} records={} failures={} probes={}",
        summary.status,
        summary.completed,
        summary.total,
        summary.records,
        summary.failures,
        summary.probes
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    let cli = Cli::parse();
    let log_file = open_log_file(&cli.log_file)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(log_file)))
        .init();

    let mut plan = SearchPlan::load(&cli.plan)
        .with_context(|| format!("loading plan {}", cli.plan.display()))?;
    for pin in &cli.pins {
        plan.pin_spec(pin).with_context(|| format!("applying pin {pin}"))?;
    }

    let name = match &cli.name {
        Some(name) => name.clone(),
        None => prompt_for_name().await?,
    };
    let name = name.trim().to_string();
    if name.is_empty() {
        bail!("the name to search for cannot be blank");
    }

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        name = %name,
        dimensions = plan.dimensions.len(),
        state = %cli.state.display(),
        "judicial-search boot"
    );

    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received, stopping after the current probe");
        signal_flag.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt, exiting without waiting for the form");
            std::process::exit(130);
        }
    });

    let driver = HttpFormDriver::new(&cli.endpoint, &cli.name_param);
    let store = JsonFileStore::new(&cli.state);
    let mut controller = SearchController::new(driver, store, plan, name, cli.search_config());

    let outcome = controller.run(&cancel).await;
    report(&controller.summary());
    outcome.context("search failed")?;

    println!("results saved to {}", cli.state.display());
    Ok(())
}

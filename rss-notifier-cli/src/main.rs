use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rss_notifier_core::{spawn_scheduler, Config, ConfigError, RunCoordinator};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Poll feeds, notify webhooks about new matching entries, remember what was seen.
#[derive(Debug, Parser)]
#[command(name = "rss-notifier", version, about)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Keep running and poll on an interval instead of exiting after one cycle
    #[arg(long)]
    watch: bool,

    /// Seconds between cycles in watch mode (overrides poll.interval_seconds)
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Log level when RUST_LOG is unset (overrides log_level in the config)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn init_tracing(level: Option<&str>) {
    let level = level.map(parse_level).unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load(&cli.config);

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().and_then(|c| c.log_level.clone()));
    init_tracing(level.as_deref());

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Result<Config, ConfigError>) -> anyhow::Result<()> {
    let config = config.context("failed to load configuration")?;
    let feeds = config.resolve_feeds().context("invalid configuration")?;
    let coordinator = RunCoordinator::from_config(&config)?;

    if !cli.watch {
        let report = coordinator.run_cycle(&feeds).await?;
        for failure in &report.failures {
            warn!(feed = %failure.feed, stage = ?failure.stage, error = %failure.error, "feed skipped this cycle");
        }
        info!(
            matched = report.matched(),
            delivered = report.delivered(),
            committed = report.committed,
            "run finished"
        );
        return Ok(());
    }

    let interval = cli
        .interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.poll.interval());
    info!(feeds = feeds.len(), ?interval, "watching feeds; press Ctrl-C to stop");

    let handle = spawn_scheduler(Arc::new(coordinator), Arc::new(feeds), interval);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("interrupt received; stopping");
    handle.stop().await?;
    Ok(())
}

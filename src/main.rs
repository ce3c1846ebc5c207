use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use bufferbridge::broker::InMemoryBroker;
use bufferbridge::manager::Manager;
use bufferbridge::ratelimit;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "bufferbridge", about = "Time-windowed, rate-limited message relay")]
struct Cli {
    /// Path to the scheduler manifest, or a single per-scheduler YAML file
    #[arg(short, long, default_value = "config/manager.yaml")]
    config: PathBuf,

    /// Raise the log level (repeatable: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let rate_limiter_registry = Arc::new(ratelimit::default_registry());
    let broker = InMemoryBroker::new();

    let manager = Manager::load(&cli.config, rate_limiter_registry, broker)
        .with_context(|| format!("loading scheduler configuration from {}", cli.config.display()))?;

    manager
        .start_all()
        .context("starting scheduler(s): no snapshot could be built")?;
    tracing::info!(config = %cli.config.display(), "bufferbridge: started");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(wait_for_shutdown());

    manager.stop_all();
    tracing::info!("bufferbridge: shutdown complete");
    Ok(())
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let default_directive = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false).json())
                .init();
        }
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("bufferbridge: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("bufferbridge: received SIGTERM, shutting down"),
    }
}

/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: A running ledger monitor with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use ledger_link_client::{Client, WebSocketTransport};
use ledger_link_monitor::{LoggingConfig, Monitor, MonitorConfig};

#[derive(Parser, Debug)]
#[command(name = "ledger-link-monitor", version, about = "Follow a ledger node over WebSocket")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    /// Overrides `logging.level` from the config file
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let config = MonitorConfig::from_file(&args.config_path).context("load config")?;
    let level = args
        .log_level
        .clone()
        .or_else(|| config.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let _log_guard = init_tracing(&level, &config.logging)?;

    info!(
        config_path = %args.config_path.display(),
        endpoint = %config.endpoint,
        dry_run = args.dry_run,
        "starting ledger-link-monitor"
    );

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let client = Client::new(WebSocketTransport::new(), config.client_config());
    let monitor = Monitor::new(client, config);
    let stats = monitor.run(shutdown).await.context("run monitor")?;

    info!(
        ledgers = stats.ledgers,
        validated_transactions = stats.validated_transactions,
        "shutdown complete"
    );
    Ok(())
}

/// Stderr logging plus an optional daily-rolling file sink.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(level: &str, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(level).context("invalid log level")?;

    let (file_sink, guard) = match &logging.directory {
        Some(directory) => {
            let (layer, guard) = file_layer(directory, &logging.file_prefix)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_sink)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(guard)
}

type FileLayer<S> = fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format, NonBlocking>;

fn file_layer<S>(directory: &Path, prefix: &str) -> Result<(FileLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    std::fs::create_dir_all(directory)
        .with_context(|| format!("create log directory {}", directory.display()))?;
    let appender = tracing_appender::rolling::daily(directory, prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    Ok((layer, guard))
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}

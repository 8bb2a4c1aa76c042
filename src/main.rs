use anyhow::Context;
use receipt_print_server::api::{self, ApiState};
use receipt_print_server::config::AppConfig;
use receipt_print_server::printer::{DriverOptions, NetworkPrinter};
use receipt_print_server::sentry_init;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "receipt-print-server.log";

/// Console output always; a daily rolling file when `log_dir` is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &AppConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false),
        )
        .with(file_layer)
        .with(sentry_tracing::layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight requests");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config)?;

    // Must stay alive until exit
    let _sentry_guard = sentry_init::init();

    info!("========================================");
    info!("Receipt Print Server Starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!(
        "Job timeout {:?}, dedup window {}, outcome log {}",
        config.job_timeout(),
        config.dedup_window,
        config.outcome_log_capacity
    );

    let driver = Arc::new(NetworkPrinter::new(DriverOptions::from_config(&config)));
    let (state, dispatcher) = ApiState::new(&config, driver);

    api::start_api_server(&config, state, shutdown_signal())
        .await
        .context("HTTP API server failed")?;

    // The router held the last queue handle; pending jobs drain before this resolves
    if let Err(e) = dispatcher.await {
        warn!("Print queue dispatcher ended abnormally: {}", e);
    }

    info!("Receipt Print Server stopped");
    Ok(())
}

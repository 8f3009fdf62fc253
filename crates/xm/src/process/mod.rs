pub mod utils;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::crypto::{ChaChaHmac, CipherSuite, X25519};
use common::frame::{FrameCodec, FrameConfig};
use common::transfer::{TransferConfig, TransferError, TransferService};

use crate::http_server;
use crate::ServiceConfig;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const LOG_FILE_NAME: &str = "xm.log";

/// Where console logs are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    /// Used when stdout carries a payload
    Stderr,
}

/// Initialize logging and the panic handler.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(
    log_level: tracing::Level,
    log_dir: Option<&Path>,
    target: LogTarget,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    let (console_writer, console_guard) = match target {
        LogTarget::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogTarget::Stderr => tracing_appender::non_blocking(std::io::stderr()),
    };
    guards.push(console_guard);

    let console_env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(console_writer)
        .with_filter(console_env_filter);

    if let Some(log_dir) = log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(console_layer).init();
    }

    utils::register_panic_logger();

    guards
}

/// Build the transfer service for a resolved configuration.
pub fn create_service(service_config: &ServiceConfig) -> Result<TransferService, TransferError> {
    let suite: Arc<dyn CipherSuite> = Arc::new(ChaChaHmac);
    let frame_config = FrameConfig::for_suite(suite.as_ref());

    TransferService::new(
        TransferConfig {
            root: service_config.root.clone(),
            authorized_key: service_config.authorized_key,
        },
        Arc::new(X25519),
        FrameCodec::new(suite, frame_config),
    )
}

/// Handle for gracefully shutting down the transfer server.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    server: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the server shuts down, on a signal or when it exits by itself.
    pub async fn wait(self) {
        tokio::select! {
            _ = self.graceful_waiter => {}
            // the server may also exit on its own, e.g. a failed bind
            _ = self.shutdown_tx.closed() => {}
        }
        let _ = self.shutdown_tx.send(());

        if timeout(FINAL_SHUTDOWN_TIMEOUT, self.server).await.is_err() {
            tracing::error!(
                "Failed to shut down within {} seconds",
                FINAL_SHUTDOWN_TIMEOUT.as_secs()
            );
            std::process::exit(4);
        }
    }
}

/// Create the service and spawn the HTTP server, returning a shutdown handle.
pub async fn start_service(service_config: &ServiceConfig) -> Result<ShutdownHandle, ProcessError> {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let service = create_service(service_config)?;

    tracing::info!(root = %service.root().display(), "serving directory");
    if let Some(key) = service.authorized_key() {
        tracing::info!(key = %key, "authorization");
    }

    let config = http_server::Config::new(service_config.listen_addr)
        .with_log_level(service_config.log_level);
    let server = tokio::spawn(async move {
        if let Err(e) = http_server::run(config, service, shutdown_rx).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    Ok(ShutdownHandle {
        graceful_waiter,
        server,
        shutdown_tx,
    })
}

/// Spawns the transfer server.
/// Blocks until shutdown signal is received. Use for CLI binary usage.
pub async fn spawn_service(service_config: &ServiceConfig) -> Result<(), ProcessError> {
    let _guards = init_logging(
        service_config.log_level,
        service_config.log_dir.as_deref(),
        LogTarget::Stdout,
    );
    utils::report_build_info();

    let handle = start_service(service_config).await?;
    handle.wait().await;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),
    #[error("failed to create transfer service: {0}")]
    Service(#[from] TransferError),
}

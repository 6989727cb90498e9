use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, TurnstileConfig};
use turnstile::context::AppContext;
use turnstile::http::HttpServer;
use turnstile::ratelimit::SystemClock;
use turnstile::store::MemoryStore;

/// Distributed admission control service.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log output format (overrides configuration)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Keep state in process memory instead of Redis (single instance only)
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = TurnstileConfig::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.server.log_format = format;
    }

    // Initialize tracing
    init_tracing(config.server.log_format);

    info!("Starting Turnstile Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        store = %config.store.addr,
        failure_threshold = config.breaker.failure_threshold,
        cool_down_secs = config.breaker.cool_down_secs,
        lock_ttl_secs = config.lock.ttl_secs,
        "Configuration loaded"
    );

    let addr = config.server.socket_addr()?;

    // Wire the store, breaker, lock and limiters
    let ctx = if cli.memory_store {
        warn!("Using in-process store; limits are not shared across instances");
        AppContext::with_store(config, Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    } else {
        AppContext::connect(config).await?
    };

    let server = HttpServer::new(addr, Arc::new(ctx));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile Admission Control Service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

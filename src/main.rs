mod arbiter;
mod config;
mod health;
mod http;
mod metrics;
mod protocol;
mod registry;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::arbiter::Arbiter;
use crate::config::Config;
use crate::metrics::MetricsRegistry;
use crate::protocol::{DeviceTransport, HttpTransport};
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "i2s-arbiter", about = "I2S audio service arbiter")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/i2s-arbiter/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub arbiter: Arc<Arbiter>,
    pub metrics: MetricsRegistry,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state.clone()));

    let listen_addr: std::net::SocketAddr = state
        .config
        .listen
        .parse()
        .context("invalid listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting i2s-arbiter");

    // ---- Config ----
    let config = Arc::new(config::load_or_default(&cli.config));

    // ---- Engine ----
    let registry = Registry::from_config(&config.services);
    tracing::info!(services = registry.len(), "service registry loaded");
    for desc in registry.iter() {
        tracing::info!(
            service = %desc.id,
            url = %desc.base_url,
            priority = desc.priority,
            protocol = ?desc.protocol,
            "managing service"
        );
    }

    let transport: Arc<dyn DeviceTransport> = Arc::new(HttpTransport::new(config.request_timeout())?);
    let metrics = MetricsRegistry::new();
    let arbiter = Arc::new(Arbiter::new(
        registry,
        transport,
        Arc::clone(&metrics.metrics),
    ));

    arbiter.start_polling(config.poll_interval()).await;

    // ---- App state ----
    let state = AppState {
        config: Arc::clone(&config),
        arbiter: Arc::clone(&arbiter),
        metrics,
    };

    // ---- Serve until signalled ----
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut http_handle = tokio::spawn(run_http_server(state, shutdown_rx));

    tokio::select! {
        () = shutdown_signal() => {}
        res = &mut http_handle => {
            arbiter.stop_polling().await;
            return res.context("HTTP server task panicked")?;
        }
    }

    // ---- Shutdown ----
    tracing::info!("shutting down");
    arbiter.stop_polling().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.shutdown_grace(), http_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("i2s-arbiter shut down cleanly"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server failed"),
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task panicked"),
        Err(_) => tracing::warn!(
            grace_ms = config.shutdown_grace_ms,
            "in-flight requests did not finish within the grace period"
        ),
    }

    Ok(())
}

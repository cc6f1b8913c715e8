//! Order-execution service entry point.
//!
//! Loads configuration, wires every subsystem through [`state::AppState`],
//! starts the supervised background tasks in [`runtime::Runtime`], then
//! serves the HTTP API until asked to shut down.

mod accounts;
mod api;
mod audit;
mod auth;
mod broker;
mod clients;
mod config;
mod context;
mod db;
mod domain;
mod error;
mod gtt;
mod idempotency;
mod orders;
mod positions;
mod ratelimit;
mod reconcile;
mod resilience;
mod runtime;
mod state;
mod subscriptions;
mod ticks;
mod tiers;

use anyhow::{Context as _, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;

    let config = Config::from_env().context("failed to load configuration")?;
    let bind_addr = format!("0.0.0.0:{}", config.port);

    let state = AppState::build(config, metrics_handle).context("failed to build application state")?;
    let shutdown_grace_period = state.config.operational.shutdown_grace_period;

    let runtime = runtime::Runtime::start(&state);

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(%bind_addr, "order-core listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!(?shutdown_grace_period, "draining background tasks");
    runtime.shutdown().await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves once an operator asks the process to stop (Ctrl-C, or SIGTERM on
/// unix — the usual way an orchestrator stops a container).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

// =============================================================================
// Candle Sim — Main Entry Point
// =============================================================================
//
// Simulates a fixed set of crypto trading pairs in memory, serves their candle
// history over HTTP and streams live candle updates over WebSocket. Nothing is
// persisted: every start generates a fresh synthetic day of history.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod error;
mod market_data;
mod registry;
mod runtime_config;
mod types;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::registry::Registry;
use crate::runtime_config::SimConfig;

const DEFAULT_CONFIG_PATH: &str = "candle_sim.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("CANDLE_SIM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = SimConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        SimConfig::default()
    });
    config.apply_env().context("invalid environment override")?;
    config.validate().context("invalid configuration")?;

    let symbols: Vec<&str> = config.pairs.iter().map(|p| p.symbol.as_str()).collect();
    info!(symbols = ?symbols, "Configured trading pairs");

    // ── 2. Trading pairs & simulators ────────────────────────────────────
    let registry = Registry::initialize(&config);
    let state = Arc::new(AppState::new(registry.clone(), config.clone()));

    // ── 3. API server ────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "API server listening");

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let (draining_tx, mut draining_rx) = watch::channel(false);

    let shutdown_registry = registry.clone();
    let server = axum::serve(listener, api::rest::router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            warn!("Shutdown signal received, stopping gracefully");
            shutdown_registry.shutdown(grace).await;
            draining_tx.send_replace(true);
        })
        .into_future();

    // ── 4. Run until shutdown, bounding the drain ────────────────────────
    tokio::select! {
        result = server => {
            result.context("API server failed")?;
            info!("Server exited properly");
        }
        _ = async {
            let _ = draining_rx.wait_for(|draining| *draining).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_secs = grace.as_secs(), "Connections did not drain in time, forcing exit");
        }
    }

    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

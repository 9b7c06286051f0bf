//! Webhook relay server.
//!
//! Run with: cargo run -p webhook-relay-server
//!
//! Clients connect to `ws://<host>:<port>/ws`; webhooks are posted to
//! `/webhook`. See `RelayConfig::from_env` for the environment variables.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webhook_relay_core::{ConnectionRegistry, RelayConfig, RelayDispatcher};
use webhook_relay_session::{CommandRouter, storage::MemorySessionStore};
use webhook_relay_transport::{AppState, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RelayConfig::from_env().context("Invalid relay configuration")?;

    let registry = Arc::new(ConnectionRegistry::new());
    let relay = Arc::new(RelayDispatcher::new(registry, config.sync_timeout));
    let commands = Arc::new(CommandRouter::with_default_handlers(Arc::new(
        MemorySessionStore::new(),
    )));
    let app = create_router(AppState::new(relay, commands, &config));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(
        sync_timeout = ?config.sync_timeout,
        heartbeat = ?config.heartbeat_interval,
        "Webhook relay listening on http://{}",
        config.bind_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Webhook relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

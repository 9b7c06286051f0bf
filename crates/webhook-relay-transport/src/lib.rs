//! HTTP and WebSocket surface for the webhook relay.
//!
//! Provides:
//! - Webhook ingress and health endpoint
//! - WebSocket transport with per-connection heartbeat
//! - `InboundMessageRouter` for frames sent by clients
//! - `WebhookVerifier` seam for request authentication

pub mod inbound;
pub mod verify;
pub mod webhook;
pub mod websocket;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use webhook_relay_core::{RelayConfig, RelayDispatcher};
use webhook_relay_session::CommandRouter;

pub use inbound::InboundMessageRouter;
pub use verify::{AllowAll, VerifyError, WebhookVerifier};
pub use webhook::WebhookError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayDispatcher>,
    pub inbound: InboundMessageRouter,
    pub verifier: Arc<dyn WebhookVerifier>,
    pub heartbeat_interval: Duration,
}

impl AppState {
    /// Create state that accepts every webhook.
    #[must_use]
    pub fn new(relay: Arc<RelayDispatcher>, commands: Arc<CommandRouter>, config: &RelayConfig) -> Self {
        Self {
            inbound: InboundMessageRouter::new(Arc::clone(&relay), commands),
            relay,
            verifier: Arc::new(AllowAll),
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    /// Replace the webhook verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: impl WebhookVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }
}

/// Build the relay router.
///
/// # Example
/// ```ignore
/// let app = create_router(AppState::new(relay, commands, &config));
/// axum::serve(listener, app).await?;
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(webhook::health_handler))
        .route("/webhook", post(webhook::webhook_handler))
        .route("/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

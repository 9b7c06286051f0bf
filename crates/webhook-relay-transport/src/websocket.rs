//! WebSocket transport for relay clients.
//!
//! Each upgraded socket becomes a [`Connection`] in the registry. A writer
//! task drains the connection's queue and sends a heartbeat ping on its own
//! timer; the reader loop feeds text frames to the [`InboundMessageRouter`].
//!
//! [`InboundMessageRouter`]: crate::InboundMessageRouter

use std::{fmt::Display, time::Duration};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use webhook_relay_core::{Connection, ConnectionId, Envelope};

use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    serve_connection(sender, receiver, state).await;
}

/// Run one client connection until its stream ends or fails.
///
/// The connection is registered for its whole lifetime and removed exactly
/// once on the way out.
async fn serve_connection<S, R, E>(sender: S, mut receiver: R, state: AppState) -> ConnectionId
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (conn, rx) = Connection::new();
    let conn_id = conn.id();
    let registry = state.relay.registry();

    // Queued before registration so no broadcast can overtake it.
    let _ = conn.send(Envelope::connection_ack());
    registry.add(conn.clone());
    tracing::info!(connection_id = %conn_id, clients = registry.len(), "Client connected");

    let send_task = tokio::spawn(write_loop(sender, rx, state.heartbeat_interval, conn_id));

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(connection_id = %conn_id, "WebSocket error: {e}");
                break;
            }
        };

        if let Some(reply) = state.inbound.handle_text(&text).await {
            if conn.send(reply).is_err() {
                break;
            }
        }
    }

    send_task.abort();
    registry.remove(conn_id);
    tracing::info!(connection_id = %conn_id, clients = registry.len(), "Client disconnected");
    conn_id
}

/// Forward queued envelopes to the socket and ping on every heartbeat tick.
///
/// Returns when the queue closes or a write fails. Dropping `rx` on return
/// makes every later send to this connection fail.
async fn write_loop<S>(
    mut sender: S,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    heartbeat: Duration,
    conn_id: ConnectionId,
) where
    S: Sink<Message> + Unpin,
{
    let mut ticker = time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let envelope = tokio::select! {
            msg = rx.recv() => match msg {
                Some(envelope) => envelope,
                None => break,
            },
            _ = ticker.tick() => {
                tracing::trace!(connection_id = %conn_id, "Sending heartbeat");
                Envelope::ping()
            }
        };

        let json = match serde_json::to_string(&envelope) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            tracing::debug!(connection_id = %conn_id, "Socket write failed, closing writer");
            break;
        }
    }
}

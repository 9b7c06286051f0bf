//! Classification of frames arriving on a client connection.

use std::sync::Arc;

use serde_json::json;
use webhook_relay_core::{Envelope, RelayDispatcher, SessionCommand, SessionResponse};
use webhook_relay_session::CommandRouter;

/// Dispatches inbound envelopes to the relay or the command router.
///
/// Shared by every connection; holds no per-connection state.
#[derive(Clone)]
pub struct InboundMessageRouter {
    relay: Arc<RelayDispatcher>,
    commands: Arc<CommandRouter>,
}

impl InboundMessageRouter {
    #[must_use]
    pub const fn new(relay: Arc<RelayDispatcher>, commands: Arc<CommandRouter>) -> Self {
        Self { relay, commands }
    }

    /// Handle one text frame and return the reply to queue, if any.
    ///
    /// Frames that do not decode as a known envelope are answered with a
    /// pong so older and newer clients stay connected.
    pub async fn handle_text(&self, text: &str) -> Option<Envelope> {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                tracing::debug!("Unrecognized client message, answering with pong: {e}");
                Some(Envelope::pong())
            }
        }
    }

    /// Handle one decoded envelope.
    pub async fn handle(&self, envelope: Envelope) -> Option<Envelope> {
        match envelope {
            Envelope::Ping { .. } => Some(Envelope::pong()),
            Envelope::Pong { .. } => {
                tracing::trace!("Heartbeat pong received");
                None
            }
            Envelope::EventResult(result) => {
                if result.correlation().is_some() {
                    self.relay.complete(result);
                } else {
                    tracing::warn!("Ignoring task result without a correlation id");
                }
                None
            }
            Envelope::SessionCommand(command) => Some(self.run_command(command).await),
            other => {
                tracing::debug!(kind = other.kind(), "Unexpected client message, answering with pong");
                Some(Envelope::pong())
            }
        }
    }

    async fn run_command(&self, command: SessionCommand) -> Envelope {
        let SessionCommand {
            command,
            session_id,
            data,
        } = command;
        let result = self
            .commands
            .route(&command, &data, session_id.as_deref())
            .await;

        Envelope::SessionResponse(SessionResponse {
            command,
            session_id,
            status: result.status().to_string(),
            message: result.message,
            data: result.data,
            error: result.error.map(|e| json!(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio_test::assert_ok;
    use webhook_relay_core::{ConnectionRegistry, RelayOutcome, RelayRequest};
    use webhook_relay_session::storage::MemorySessionStore;

    use super::*;

    fn router() -> InboundMessageRouter {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(RelayDispatcher::new(registry, Duration::from_secs(5)));
        let commands = Arc::new(CommandRouter::with_default_handlers(Arc::new(
            MemorySessionStore::new(),
        )));
        InboundMessageRouter::new(relay, commands)
    }

    fn kind_of(reply: Option<Envelope>) -> Option<&'static str> {
        reply.map(|e| e.kind())
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let router = router();
        assert_eq!(kind_of(router.handle_text(r#"{"type":"ping"}"#).await), Some("pong"));
    }

    #[tokio::test]
    async fn test_pong_is_not_answered() {
        let router = router();
        assert!(router.handle_text(r#"{"type":"pong"}"#).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_garbage_get_pong() {
        let router = router();
        assert_eq!(
            kind_of(router.handle_text(r#"{"type":"hello_from_the_future"}"#).await),
            Some("pong")
        );
        assert_eq!(kind_of(router.handle_text("not json").await), Some("pong"));
        assert_eq!(
            kind_of(router.handle_text(r#"{"type":"connection","message":"x","timestamp":1}"#).await),
            Some("pong")
        );
    }

    #[tokio::test]
    async fn test_task_result_completes_pending_relay() {
        let router = router();
        let relay = Arc::clone(&router.relay);
        let waiting = tokio::spawn(async move {
            relay
                .relay(RelayRequest::new(json!({})).synchronous(Some("t1".into())))
                .await
        });
        while !router.relay.pending().contains("t1") {
            tokio::task::yield_now().await;
        }

        let reply = router
            .handle_text(r#"{"type":"task_result","task_id":"t1","status":"completed","output":"ok"}"#)
            .await;
        assert!(reply.is_none());

        let outcome = assert_ok!(assert_ok!(waiting.await));
        match outcome {
            RelayOutcome::Completed { result, .. } => {
                assert_eq!(result.output(), Some(&Value::from("ok")));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_task_result_with_task_id_and_correlation_id() {
        let router = router();
        let relay = Arc::clone(&router.relay);
        let waiting = tokio::spawn(async move {
            relay
                .relay(RelayRequest::new(json!({})).synchronous(Some("t1".into())))
                .await
        });
        while !router.relay.pending().contains("t1") {
            tokio::task::yield_now().await;
        }

        let reply = router
            .handle_text(
                r#"{"type":"task_result","task_id":"t1","correlation_id":"t1","status":"completed"}"#,
            )
            .await;
        assert!(reply.is_none());
        assert!(!router.relay.pending().contains("t1"));

        let outcome = assert_ok!(assert_ok!(waiting.await));
        assert!(matches!(outcome, RelayOutcome::Completed { ref correlation_id, .. } if correlation_id == "t1"));
    }

    #[tokio::test]
    async fn test_late_task_result_is_ignored() {
        let router = router();
        let reply = router
            .handle_text(r#"{"type":"task_result","task_id":"nobody-waiting","status":"completed"}"#)
            .await;
        assert!(reply.is_none());
        assert!(router.relay.pending().is_empty());
    }

    #[tokio::test]
    async fn test_session_command_round_trip() {
        let router = router();
        let reply = router
            .handle_text(
                r#"{"type":"collaborative_session_command","command":"create_session","session_id":"s1","data":{"title":"Retro"}}"#,
            )
            .await;
        let Some(Envelope::SessionResponse(response)) = reply else {
            panic!("expected session response");
        };
        assert_eq!(response.status, "success");
        assert_eq!(response.session_id.as_deref(), Some("s1"));
        assert_eq!(response.data["title"], "Retro");

        let reply = router
            .handle_text(
                r#"{"type":"collaborative_session_command","command":"store_memory","session_id":"ghost","data":{}}"#,
            )
            .await;
        let Some(Envelope::SessionResponse(response)) = reply else {
            panic!("expected session response");
        };
        assert_eq!(response.status, "error");
        assert_eq!(response.error.unwrap()["kind"], "session_not_found");
    }
}

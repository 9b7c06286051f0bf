//! Webhook ingress and health endpoint.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::{Value, json};
use thiserror::Error;
use webhook_relay_core::{RelayError, RelayOutcome, RelayRequest, envelope::unix_timestamp};

use crate::{AppState, verify::VerifyError};

const SERVICE_NAME: &str = "webhook-relay";

/// Webhook rejection, rendered as `{"error": ...}` with a matching status.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid JSON payload")]
    InvalidJson,
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Invalid or missing API key")]
    Unauthorized,
    #[error("Synchronous mode requires task_id in data")]
    MissingTaskId,
    #[error("Task '{0}' is already awaiting a result")]
    DuplicateTask(String),
}

impl From<VerifyError> for WebhookError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::InvalidSignature => Self::InvalidSignature,
            VerifyError::Unauthorized(reason) => {
                tracing::debug!("Rejected webhook: {reason}");
                Self::Unauthorized
            }
        }
    }
}

impl From<RelayError> for WebhookError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::MissingCorrelationId => Self::MissingTaskId,
            RelayError::DuplicateCorrelation(id) => Self::DuplicateTask(id),
        }
    }
}

impl WebhookError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson | Self::MissingTaskId => StatusCode::BAD_REQUEST,
            Self::InvalidSignature => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::DuplicateTask(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        tracing::warn!("Rejected webhook: {self}");
        (self.status(), Json(json!({"error": self.to_string()}))).into_response()
    }
}

/// `GET /`
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "service": SERVICE_NAME,
        "connected_clients": state.relay.registry().len(),
        "timestamp": unix_timestamp(),
    }))
}

/// `POST /webhook`
///
/// Relays the body to every connected client. With `"sync": true` the call
/// blocks until a client reports a result for `data.task_id` or the deadline
/// passes.
///
/// # Errors
/// Returns error if verification fails, the body is not JSON, or a
/// synchronous request lacks a usable task id.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    state.verifier.verify(&headers, &body)?;

    let payload: Value = serde_json::from_slice(&body).map_err(|_| WebhookError::InvalidJson)?;
    let sync = payload.get("sync").and_then(Value::as_bool).unwrap_or(false);
    let task_id = payload
        .get("data")
        .and_then(|d| d.get("task_id"))
        .or_else(|| payload.get("correlation_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string);

    let mut request = RelayRequest::new(payload);
    if let Some(event) = header_str(&headers, "x-github-event") {
        request = request.event(event);
    }
    if let Some(delivery_id) = header_str(&headers, "x-github-delivery") {
        request = request.delivery_id(delivery_id);
    }
    if sync {
        request = request.synchronous(task_id);
    }

    let outcome = state.relay.relay(request).await?;
    let clients_notified = outcome.report().delivered;
    let response = match outcome {
        RelayOutcome::Delivered {
            event, delivery_id, ..
        } => Json(json!({
            "status": "received",
            "event": event,
            "delivery_id": delivery_id,
            "clients_notified": clients_notified,
        }))
        .into_response(),
        RelayOutcome::Completed {
            correlation_id,
            result,
            elapsed,
            ..
        } => Json(json!({
            "status": result.status().unwrap_or("completed"),
            "task_id": correlation_id,
            "output": result.output(),
            "execution_time_ms": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "clients_notified": clients_notified,
        }))
        .into_response(),
        RelayOutcome::TimedOut {
            correlation_id,
            timeout,
            ..
        } => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({
                "status": "timeout",
                "task_id": correlation_id,
                "error": format!("Task execution exceeded {timeout:?} timeout"),
                "message": "Task may still be running on the client. Check its results.",
            })),
        )
            .into_response(),
    };
    Ok(response)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::Request,
    };
    use tower::ServiceExt;
    use webhook_relay_core::{
        Connection, ConnectionRegistry, Envelope, EventResult, RelayConfig, RelayDispatcher,
    };
    use webhook_relay_session::{CommandRouter, storage::MemorySessionStore};

    use super::*;
    use crate::{create_router, verify::WebhookVerifier};

    struct DenyAll(VerifyError);

    impl WebhookVerifier for DenyAll {
        fn verify(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<(), VerifyError> {
            Err(self.0.clone())
        }
    }

    fn state(timeout: Duration) -> AppState {
        let config = RelayConfig {
            sync_timeout: timeout,
            ..RelayConfig::default()
        };
        let relay = Arc::new(RelayDispatcher::new(
            Arc::new(ConnectionRegistry::new()),
            config.sync_timeout,
        ));
        let commands = Arc::new(CommandRouter::with_default_handlers(Arc::new(
            MemorySessionStore::new(),
        )));
        AppState::new(relay, commands, &config)
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", "push")
            .header("x-github-delivery", "d-42")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_clients() {
        let state = state(Duration::from_secs(1));
        let (conn, _rx) = Connection::new();
        state.relay.registry().add(conn);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = call(create_router(state), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["connected_clients"], 1);
    }

    #[tokio::test]
    async fn test_async_webhook_is_broadcast() {
        let state = state(Duration::from_secs(1));
        let (conn, mut rx) = Connection::new();
        state.relay.registry().add(conn);

        let (status, body) = call(create_router(state), post(r#"{"action":"opened"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "received");
        assert_eq!(body["event"], "push");
        assert_eq!(body["delivery_id"], "d-42");
        assert_eq!(body["clients_notified"], 1);

        match rx.try_recv().unwrap() {
            Envelope::Event(event) => {
                assert_eq!(event.event.as_deref(), Some("push"));
                assert!(!event.sync);
                assert_eq!(event.payload["action"], "opened");
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let (status, body) = call(create_router(state(Duration::from_secs(1))), post("{nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid JSON payload");
    }

    #[tokio::test]
    async fn test_sync_without_task_id_is_rejected() {
        let (status, body) = call(
            create_router(state(Duration::from_secs(1))),
            post(r#"{"sync":true,"data":{}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Synchronous mode requires task_id in data");
    }

    #[tokio::test]
    async fn test_verifier_rejections() {
        let app = create_router(
            state(Duration::from_secs(1)).with_verifier(DenyAll(VerifyError::InvalidSignature)),
        );
        let (status, _) = call(app, post("{}")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let app = create_router(
            state(Duration::from_secs(1))
                .with_verifier(DenyAll(VerifyError::Unauthorized("no key".into()))),
        );
        let (status, body) = call(app, post("{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid or missing API key");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_webhook_times_out() {
        let state = state(Duration::from_secs(1));
        let relay = Arc::clone(&state.relay);

        let (status, body) = call(
            create_router(state),
            post(r#"{"sync":true,"data":{"task_id":"t1"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["status"], "timeout");
        assert_eq!(body["task_id"], "t1");
        assert_eq!(body["error"], "Task execution exceeded 1s timeout");
        assert!(!relay.pending().contains("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subsecond_timeout_message() {
        let (status, body) = call(
            create_router(state(Duration::from_millis(500))),
            post(r#"{"sync":true,"data":{"task_id":"t2"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "Task execution exceeded 500ms timeout");
    }

    #[tokio::test]
    async fn test_sync_webhook_returns_client_result() {
        let state = state(Duration::from_secs(5));
        let (conn, mut rx) = Connection::new();
        state.relay.registry().add(conn);

        let relay = Arc::clone(&state.relay);
        let client = tokio::spawn(async move {
            let Some(Envelope::Event(event)) = rx.recv().await else {
                panic!("expected event");
            };
            let mut result = serde_json::Map::new();
            result.insert("status".into(), json!("success"));
            result.insert("output".into(), json!("built"));
            relay.complete(EventResult {
                correlation_id: event.correlation_id,
                result,
                ..EventResult::default()
            })
        });

        let (status, body) = call(
            create_router(state),
            post(r#"{"sync":true,"data":{"task_id":"t7"}}"#),
        )
        .await;
        assert!(client.await.unwrap());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["task_id"], "t7");
        assert_eq!(body["output"], "built");
        assert_eq!(body["clients_notified"], 1);
        assert!(body["execution_time_ms"].is_u64());
    }
}

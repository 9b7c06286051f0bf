//! Relay dispatcher: fan-out plus the synchronous request/response bridge.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use thiserror::Error;

use crate::{
    Envelope, Event, EventResult,
    envelope::unix_timestamp,
    pending::PendingRequestTable,
    registry::{BroadcastReport, ConnectionRegistry},
};

/// Relay error. Only protocol faults reach the caller as errors; timing
/// faults are an outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Synchronous mode requires a correlation id")]
    MissingCorrelationId,
    #[error("Correlation id already pending: {0}")]
    DuplicateCorrelation(String),
}

/// An inbound event to relay.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub event: Option<String>,
    pub delivery_id: Option<String>,
    pub payload: Value,
    /// Block until a client reports a result or the deadline passes.
    pub sync: bool,
    pub correlation_id: Option<String>,
    /// Overrides the dispatcher's default deadline.
    pub timeout: Option<Duration>,
}

impl RelayRequest {
    /// Fire-and-forget relay of `payload`.
    #[must_use]
    pub const fn new(payload: Value) -> Self {
        Self {
            event: None,
            delivery_id: None,
            payload,
            sync: false,
            correlation_id: None,
            timeout: None,
        }
    }

    /// Set the event type.
    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Set the delivery id.
    #[must_use]
    pub fn delivery_id(mut self, delivery_id: impl Into<String>) -> Self {
        self.delivery_id = Some(delivery_id.into());
        self
    }

    /// Request synchronous semantics under `correlation_id`.
    #[must_use]
    pub fn synchronous(mut self, correlation_id: Option<String>) -> Self {
        self.sync = true;
        self.correlation_id = correlation_id;
        self
    }

    /// Override the deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a relay.
#[derive(Debug, Clone)]
pub enum RelayOutcome {
    /// Asynchronous relay finished fanning out.
    Delivered {
        event: Option<String>,
        delivery_id: Option<String>,
        report: BroadcastReport,
    },
    /// A client reported a result before the deadline.
    Completed {
        correlation_id: String,
        result: EventResult,
        elapsed: Duration,
        report: BroadcastReport,
    },
    /// No result arrived in time. The task may still finish out-of-band.
    TimedOut {
        correlation_id: String,
        timeout: Duration,
        report: BroadcastReport,
    },
}

impl RelayOutcome {
    /// Fan-out report for this relay.
    #[must_use]
    pub const fn report(&self) -> &BroadcastReport {
        match self {
            Self::Delivered { report, .. }
            | Self::Completed { report, .. }
            | Self::TimedOut { report, .. } => report,
        }
    }
}

/// Packages inbound events and fans them out to connected clients.
pub struct RelayDispatcher {
    registry: Arc<ConnectionRegistry>,
    pending: PendingRequestTable,
    default_timeout: Duration,
}

impl RelayDispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            pending: PendingRequestTable::new(),
            default_timeout,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn pending(&self) -> &PendingRequestTable {
        &self.pending
    }

    /// Relay an event to every connected client.
    ///
    /// For synchronous requests the correlation id is registered before the
    /// broadcast, so a client that answers immediately is never missed.
    /// Zero connected clients is not an error; a synchronous relay then
    /// simply times out.
    ///
    /// # Errors
    /// Returns `MissingCorrelationId` or `DuplicateCorrelation` for
    /// malformed synchronous requests.
    pub async fn relay(&self, request: RelayRequest) -> Result<RelayOutcome, RelayError> {
        let RelayRequest {
            event,
            delivery_id,
            payload,
            sync,
            correlation_id,
            timeout,
        } = request;
        let timeout = timeout.unwrap_or(self.default_timeout);

        let wait = if sync {
            let correlation_id = correlation_id
                .clone()
                .ok_or(RelayError::MissingCorrelationId)?;
            let wait = self
                .pending
                .register(correlation_id.clone(), timeout)
                .map_err(|_| RelayError::DuplicateCorrelation(correlation_id))?;
            Some(wait)
        } else {
            None
        };

        let envelope = Envelope::Event(Event {
            event: event.clone(),
            delivery_id: delivery_id.clone(),
            sync,
            correlation_id: if sync { correlation_id } else { None },
            timestamp: unix_timestamp(),
            payload,
        });

        tracing::info!(
            event = event.as_deref().unwrap_or("custom"),
            delivery_id = delivery_id.as_deref().unwrap_or("-"),
            sync,
            clients = self.registry.len(),
            "Relaying event"
        );
        let report = self.registry.broadcast(&envelope);

        let Some(wait) = wait else {
            return Ok(RelayOutcome::Delivered {
                event,
                delivery_id,
                report,
            });
        };

        let correlation_id = wait.correlation_id().to_string();
        match wait.wait().await {
            Ok(completed) => {
                tracing::info!(
                    correlation_id = %correlation_id,
                    elapsed_ms = completed.elapsed.as_millis(),
                    "Received sync result"
                );
                Ok(RelayOutcome::Completed {
                    correlation_id,
                    result: completed.result,
                    elapsed: completed.elapsed,
                    report,
                })
            }
            Err(e) => {
                tracing::warn!(correlation_id = %correlation_id, "Sync relay ended without result: {e}");
                Ok(RelayOutcome::TimedOut {
                    correlation_id,
                    timeout,
                    report,
                })
            }
        }
    }

    /// Deliver a client's result to the waiting relay, if any.
    ///
    /// Results that arrive after the waiter timed out are dropped.
    pub fn complete(&self, result: EventResult) -> bool {
        let Some(correlation_id) = result.correlation().map(ToString::to_string) else {
            return false;
        };
        let matched = self.pending.signal(&correlation_id, result);
        if !matched {
            tracing::warn!(correlation_id = %correlation_id, "Dropping result with no pending request");
        }
        matched
    }
}

//! Core of the webhook relay.
//!
//! This crate provides the fundamental building blocks:
//! - `Envelope` - Tagged wire message for the client channel
//! - `ConnectionRegistry` - Live connections with best-effort fan-out
//! - `PendingRequestTable` - Correlation ids awaiting a client result
//! - `RelayDispatcher` - Fan-out plus the synchronous request/response bridge
//! - `RelayConfig` - Runtime configuration
//! - Session store traits

pub mod config;
pub mod envelope;
pub mod pending;
pub mod registry;
pub mod relay;
pub mod traits;

pub use config::RelayConfig;
pub use envelope::{Envelope, Event, EventResult, SessionCommand, SessionResponse};
pub use pending::{PendingError, PendingRequestTable};
pub use registry::{BroadcastReport, Connection, ConnectionId, ConnectionRegistry};
pub use relay::{RelayDispatcher, RelayError, RelayOutcome, RelayRequest};
pub use traits::{Session, SessionStore, StorageError};

//! Webhook authenticity checks.

use axum::http::HeaderMap;
use thiserror::Error;

/// Verification failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// Credentials are missing or unknown.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// A signature was supplied but does not match the body.
    #[error("Invalid signature")]
    InvalidSignature,
}

/// Decides whether an inbound webhook may be relayed.
///
/// Runs against the raw request bytes before any JSON parsing.
pub trait WebhookVerifier: Send + Sync {
    /// Check the request.
    ///
    /// # Errors
    /// Returns error if the request must be rejected.
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), VerifyError>;
}

/// Accepts every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl WebhookVerifier for AllowAll {
    fn verify(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<(), VerifyError> {
        Ok(())
    }
}

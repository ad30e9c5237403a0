//! Error types for response interpretation.

use thiserror::Error;

/// Errors raised while decoding a server reply.
///
/// Both variants describe a reply the client could not make sense of; the
/// session layer treats them as transient and retries the call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The body was not the JSON document the operation expects.
    #[error("malformed response (HTTP {status}): {reason}")]
    Malformed { status: u16, reason: String },

    /// The server answered with a non-success HTTP status.
    #[error("server returned HTTP {status}")]
    Status { status: u16 },

    /// The JSON decoded but lacks a field the operation needs.
    #[error("unexpected {operation} payload: {reason}")]
    UnexpectedPayload {
        operation: &'static str,
        reason: String,
    },
}

impl ProtocolError {
    /// Build an `UnexpectedPayload` error.
    pub fn payload(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::UnexpectedPayload {
            operation,
            reason: reason.into(),
        }
    }
}

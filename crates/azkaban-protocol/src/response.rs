//! Response interpretation.

use serde_json::Value;

use crate::error::ProtocolError;
use crate::{LOGIN_ERROR_MARKER, LOGIN_PAGE_MARKER};

/// An HTTP reply as received by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Create a 200 response with a JSON body.
    pub fn json(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What a successful reply to an operation looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// A JSON object, possibly carrying `error` or `status: "error"`.
    Json,
    /// An HTML page that contains the given confirmation text.
    Text { marker: String },
}

/// Interpreted reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Decoded JSON payload of a successful call.
    Json(Value),
    /// Body of a successful text call.
    Text(String),
    /// The session token was missing, stale or rejected.
    Expired,
    /// The server understood the request and refused it.
    Rejected(String),
}

/// Classify a raw reply.
///
/// The server answers a stale session with its HTML login page and a 200
/// status, so non-JSON bodies are checked for the login markers first. JSON
/// replies report expiry through their `error` field only: log payloads may
/// quote the markers. Decoding failures are reported as `ProtocolError` so
/// the caller can retry them.
pub fn interpret(raw: &RawResponse, expect: &Expect) -> Result<Outcome, ProtocolError> {
    let parsed = serde_json::from_str::<Value>(&raw.body);
    if parsed.is_err()
        && (raw.body.contains(LOGIN_PAGE_MARKER) || raw.body.contains(LOGIN_ERROR_MARKER))
    {
        return Ok(Outcome::Expired);
    }

    if !raw.is_success() {
        return Err(ProtocolError::Status { status: raw.status });
    }

    match expect {
        Expect::Json => {
            let value = parsed.map_err(|e| ProtocolError::Malformed {
                status: raw.status,
                reason: e.to_string(),
            })?;
            interpret_json(raw, value)
        }
        Expect::Text { marker } => {
            if raw.body.contains(marker.as_str()) {
                Ok(Outcome::Text(raw.body.clone()))
            } else {
                Ok(Outcome::Rejected(format!(
                    "server did not confirm the operation (expected '{}')",
                    marker
                )))
            }
        }
    }
}

fn interpret_json(raw: &RawResponse, value: Value) -> Result<Outcome, ProtocolError> {
    if !value.is_object() {
        return Err(ProtocolError::Malformed {
            status: raw.status,
            reason: "expected a JSON object".to_string(),
        });
    }

    if let Some(error) = value.get("error") {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        if is_session_error(&message) {
            return Ok(Outcome::Expired);
        }
        return Ok(Outcome::Rejected(message));
    }

    if value.get("status").and_then(Value::as_str) == Some("error") {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Ok(Outcome::Rejected(message));
    }

    Ok(Outcome::Json(value))
}

/// The API reports stale sessions as `{"error": "session"}` on most AJAX
/// endpoints and with longer messages on a few others.
fn is_session_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower == "session"
        || lower.contains("session expired")
        || lower.contains("invalid session")
        || lower.starts_with("login error")
}

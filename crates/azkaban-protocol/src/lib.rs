//! Azkaban Protocol Types
//!
//! Describes the subset of the Azkaban AJAX API used by the CLI: how each
//! remote operation is shaped as an HTTP request, and how a raw HTTP
//! response is interpreted (success, expired session, rejection, or a
//! malformed reply that is worth retrying).

pub mod error;
pub mod ops;
pub mod request;
pub mod response;

pub use error::ProtocolError;
pub use ops::Operation;
pub use request::{Method, RemoteRequest, Resource, Upload};
pub use response::{Expect, Outcome, RawResponse};

/// Form/query parameter carrying the session token.
pub const SESSION_PARAM: &str = "session.id";

/// Marker embedded by the server in its HTML login page.
pub const LOGIN_PAGE_MARKER: &str = "<!-- /.login -->";

/// Body fragment returned by the API when a request carries a stale session.
pub const LOGIN_ERROR_MARKER: &str = "Login error";

/// Default number of log bytes requested per poll.
pub const DEFAULT_LOG_CHUNK: u64 = 50_000;

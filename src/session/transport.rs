//! Transport layer for the session client
//!
//! Abstracts the HTTP exchange with the server for testability:
//! - `Transport` trait: send one request, get the raw reply back
//! - `HttpTransport`: blocking `reqwest` client for production
//! - [`crate::mock::MockAzkaban`]: in-process mock server for tests

use std::time::Duration;

use azkaban_protocol::{Method, RawResponse, RemoteRequest};
use reqwest::blocking::{multipart, Client};

use crate::alias::Endpoint;

/// Cookie the web UI uses for the session; sent alongside the parameter.
const SESSION_COOKIE: &str = "azkaban.browser.session.id";

/// Transport trait for remote calls
pub trait Transport: Send + Sync {
    /// Send `request` to `endpoint` and return the reply, whatever its status.
    fn execute(&self, endpoint: &Endpoint, request: &RemoteRequest)
        -> Result<RawResponse, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unable to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// HTTP transport backed by a blocking `reqwest` client
pub struct HttpTransport {
    verifying: Client,
    insecure: Client,
}

impl HttpTransport {
    /// Create a transport with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let build = |accept_invalid: bool| {
            Client::builder()
                .timeout(timeout)
                .danger_accept_invalid_certs(accept_invalid)
                .build()
                .map_err(|e| TransportError::Client(format!("failed to create HTTP client: {}", e)))
        };
        Ok(Self {
            verifying: build(false)?,
            insecure: build(true)?,
        })
    }

    fn client(&self, endpoint: &Endpoint) -> &Client {
        if endpoint.verify {
            &self.verifying
        } else {
            &self.insecure
        }
    }
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        endpoint: &Endpoint,
        request: &RemoteRequest,
    ) -> Result<RawResponse, TransportError> {
        let url = request.resource.url(&endpoint.url);
        log::debug!("{} {} ({} params)", request.method, url, request.params.len());

        let client = self.client(endpoint);
        let mut builder = match request.method {
            Method::Get => client.get(&url).query(&request.params),
            Method::Post => match &request.upload {
                Some(upload) => {
                    let part = multipart::Part::bytes(upload.bytes.clone())
                        .file_name(upload.file_name.clone())
                        .mime_str(&upload.content_type)
                        .map_err(|e| TransportError::Client(e.to_string()))?;
                    let form = request
                        .params
                        .iter()
                        .fold(multipart::Form::new(), |form, (k, v)| {
                            form.text(k.clone(), v.clone())
                        })
                        .part(upload.field.clone(), part);
                    client.post(&url).multipart(form)
                }
                None => client.post(&url).form(&request.params),
            },
        };
        if let Some(token) = request.session() {
            builder = builder.header(
                reqwest::header::COOKIE,
                format!("{}={}", SESSION_COOKIE, token),
            );
        }

        let response = builder.send().map_err(|e| map_error(&url, e))?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| map_error(&url, e))?;
        log::trace!("{} -> HTTP {} ({} bytes)", url, status, body.len());
        Ok(RawResponse::new(status, body))
    }
}

fn map_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        TransportError::ConnectionFailed {
            url: url.to_string(),
            reason: error.to_string(),
        }
    } else {
        TransportError::Client(error.to_string())
    }
}

//! Request types.

use std::fmt;

use crate::SESSION_PARAM;

/// HTTP method used by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// Server resource an operation is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// The server root, where logins are posted.
    Root,
    /// Project management (`/manager`).
    Manager,
    /// Execution management (`/executor`).
    Executor,
    /// Scheduling (`/schedule`).
    Schedule,
}

impl Resource {
    /// Path relative to the endpoint base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Root => "",
            Self::Manager => "manager",
            Self::Executor => "executor",
            Self::Schedule => "schedule",
        }
    }

    /// Join this resource onto a base URL.
    pub fn url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        match self.path() {
            "" => base.to_string(),
            path => format!("{}/{}", base, path),
        }
    }
}

/// A file attached to a multipart request.
#[derive(Clone, PartialEq, Eq)]
pub struct Upload {
    /// Multipart field name.
    pub field: String,
    /// File name announced to the server.
    pub file_name: String,
    /// MIME type.
    pub content_type: String,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("field", &self.field)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A fully described request, independent of the HTTP client that sends it.
///
/// GET requests carry `params` in the query string; POST requests send them
/// as form fields (or multipart text parts when `upload` is present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub method: Method,
    pub resource: Resource,
    pub params: Vec<(String, String)>,
    pub upload: Option<Upload>,
}

impl RemoteRequest {
    /// Create a request with no parameters.
    pub fn new(method: Method, resource: Resource) -> Self {
        Self {
            method,
            resource,
            params: Vec::new(),
            upload: None,
        }
    }

    /// Append a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Attach a file.
    pub fn upload(mut self, upload: Upload) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Attach the session token, replacing any previous one.
    pub fn with_session(mut self, token: &str) -> Self {
        self.params.retain(|(k, _)| k != SESSION_PARAM);
        self.params.push((SESSION_PARAM.to_string(), token.to_string()));
        self
    }

    /// Look up a parameter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The session token carried by this request, if any.
    pub fn session(&self) -> Option<&str> {
        self.get(SESSION_PARAM)
    }
}
